// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::Profile;

#[track_caller]
pub fn string_table_fetch(profile: &Profile, id: i64) -> &String {
    profile
        .string_table
        .get(id as usize)
        .unwrap_or_else(|| panic!("String {id} not found"))
}

/// Renders every sample as `(frames, first value)` where frames are the
/// function names of each location, root first, joined by `;` for inlined
/// lines. Useful to compare the stacks of two profiles regardless of ids.
#[track_caller]
pub fn folded_stacks(profile: &Profile) -> Vec<(Vec<String>, i64)> {
    let mut stacks: Vec<(Vec<String>, i64)> = profile
        .samples
        .iter()
        .map(|sample| {
            let frames = sample
                .location_ids
                .iter()
                .rev()
                .map(|id| {
                    let location = profile
                        .locations
                        .iter()
                        .find(|location| location.id == *id)
                        .unwrap_or_else(|| panic!("Location {id} not found"));
                    if location.lines.is_empty() {
                        return format!("{:#x}", location.address);
                    }
                    location
                        .lines
                        .iter()
                        .rev()
                        .map(|line| {
                            let function = profile
                                .functions
                                .iter()
                                .find(|function| function.id == line.function_id)
                                .unwrap_or_else(|| {
                                    panic!("Function {} not found", line.function_id)
                                });
                            string_table_fetch(profile, function.name).clone()
                        })
                        .collect::<Vec<_>>()
                        .join(";")
                })
                .collect();
            (frames, sample.values.first().copied().unwrap_or_default())
        })
        .collect();
    stacks.sort_unstable();
    stacks
}
