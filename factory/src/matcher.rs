//! Implementation tuple enumeration for host collocation.
//!
//! Every combination of per-component implementations is a candidate
//! tuple; a tuple survives when its members could all run on one device,
//! judged by intersecting their OS and processor dependencies. Members
//! with an empty dependency set accept anything and constrain nothing.

use sideband_assembly::{Implementation, OsDep};

/// Enumerates the cartesian product of implementation indices and keeps
/// only the compatible tuples. Enumeration and filtering are separate
/// passes; `tuple[i]` indexes into `candidates[i]`.
pub fn matching_tuples(candidates: &[&[Implementation]]) -> Vec<Vec<usize>> {
    let mut tuples = enumerate_tuples(candidates);
    tuples.retain(|tuple| {
        let members: Vec<&Implementation> = tuple
            .iter()
            .enumerate()
            .map(|(component, &index)| &candidates[component][index])
            .collect();
        compatible(&members)
    });
    tuples
}

fn enumerate_tuples(candidates: &[&[Implementation]]) -> Vec<Vec<usize>> {
    let mut tuples: Vec<Vec<usize>> = vec![Vec::new()];
    for list in candidates {
        let mut next = Vec::with_capacity(tuples.len() * list.len());
        for prefix in &tuples {
            for index in 0..list.len() {
                let mut tuple = prefix.clone();
                tuple.push(index);
                next.push(tuple);
            }
        }
        tuples = next;
    }
    tuples
}

/// A tuple is compatible when both its OS and processor dependencies
/// have a non-empty running intersection (or no member constrains them).
pub fn compatible(members: &[&Implementation]) -> bool {
    let os = intersect(members.iter().map(|member| member.os_deps.as_slice()));
    let processors = intersect(members.iter().map(|member| member.processor_deps.as_slice()));
    os.is_none_or(|set| !set.is_empty()) && processors.is_none_or(|set| !set.is_empty())
}

/// Running intersection of OS dependencies across the tuple, used for
/// the downstream allocation request. Empty when no member constrains
/// the OS.
pub fn merge_os(members: &[&Implementation]) -> Vec<OsDep> {
    intersect(members.iter().map(|member| member.os_deps.as_slice())).unwrap_or_default()
}

/// Running intersection of processor dependencies across the tuple.
pub fn merge_processors(members: &[&Implementation]) -> Vec<String> {
    intersect(members.iter().map(|member| member.processor_deps.as_slice())).unwrap_or_default()
}

/// Folds the non-empty sets into their intersection; `None` when every
/// set was empty (nothing constrains the attribute).
fn intersect<'a, T, I>(sets: I) -> Option<Vec<T>>
where
    T: Clone + PartialEq + 'a,
    I: Iterator<Item = &'a [T]>,
{
    let mut merged: Option<Vec<T>> = None;
    for set in sets {
        if set.is_empty() {
            continue;
        }
        merged = Some(match merged {
            None => set.to_vec(),
            Some(current) => current
                .into_iter()
                .filter(|item| set.contains(item))
                .collect(),
        });
    }
    merged
}

#[cfg(test)]
mod tests {
    use sideband_assembly::Code;

    use super::*;

    fn implementation(id: &str, processors: &[&str], os: &[&str]) -> Implementation {
        Implementation::builder()
            .id(id)
            .code(Code::executable(format!("{id}.bin"), id))
            .processor_deps(processors.iter().map(|p| p.to_string()).collect())
            .os_deps(os.iter().map(|name| OsDep::new(*name)).collect())
            .build()
    }

    #[test]
    fn product_covers_every_combination() {
        let first = vec![
            implementation("a1", &[], &[]),
            implementation("a2", &[], &[]),
        ];
        let second = vec![
            implementation("b1", &[], &[]),
            implementation("b2", &[], &[]),
            implementation("b3", &[], &[]),
        ];
        let tuples = matching_tuples(&[&first, &second]);
        assert_eq!(tuples.len(), 6);
    }

    #[test]
    fn incompatible_processors_are_filtered() {
        let first = vec![
            implementation("a_x86", &["x86_64"], &[]),
            implementation("a_arm", &["armv8"], &[]),
        ];
        let second = vec![implementation("b_x86", &["x86_64"], &[])];

        let tuples = matching_tuples(&[&first, &second]);
        assert_eq!(tuples, vec![vec![0, 0]]);
    }

    #[test]
    fn empty_sets_do_not_constrain() {
        let first = vec![implementation("a_any", &[], &[])];
        let second = vec![implementation("b_arm", &["armv8"], &[])];

        let tuples = matching_tuples(&[&first, &second]);
        assert_eq!(tuples.len(), 1);

        let members = [&first[0], &second[0]];
        assert_eq!(merge_processors(&members), vec!["armv8".to_string()]);
    }

    #[test]
    fn all_empty_sets_are_trivially_compatible() {
        let first = vec![implementation("a", &[], &[])];
        let second = vec![implementation("b", &[], &[])];
        let members = [&first[0], &second[0]];
        assert!(compatible(&members));
        assert!(merge_os(&members).is_empty());
        assert!(merge_processors(&members).is_empty());
    }

    #[test]
    fn merge_is_a_subset_of_every_non_empty_member_set() {
        let first = vec![implementation("a", &["x86_64", "armv8"], &["Linux", "VxWorks"])];
        let second = vec![implementation("b", &["x86_64"], &["Linux"])];
        let third = vec![implementation("c", &[], &["Linux", "SunOS"])];

        let members = [&first[0], &second[0], &third[0]];
        assert!(compatible(&members));

        let os = merge_os(&members);
        assert_eq!(os, vec![OsDep::new("Linux")]);
        let processors = merge_processors(&members);
        assert_eq!(processors, vec!["x86_64".to_string()]);
        for member in members {
            if !member.processor_deps.is_empty() {
                assert!(processors.iter().all(|p| member.processor_deps.contains(p)));
            }
            if !member.os_deps.is_empty() {
                assert!(os.iter().all(|dep| member.os_deps.contains(dep)));
            }
        }
    }

    #[test]
    fn disjoint_os_requirements_kill_the_tuple() {
        let first = vec![implementation("a", &[], &["Linux"])];
        let second = vec![implementation("b", &[], &["VxWorks"])];
        assert!(matching_tuples(&[&first, &second]).is_empty());
    }
}
