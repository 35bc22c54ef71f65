//! Merging isolator outputs into one launch descriptor.
//!
//! Lists concatenate in isolator order. Scalars may be set by at most one
//! isolator; a repeated identical value is accepted. Sets and maps union,
//! later isolators overriding earlier ones per key. A namespace kind can be
//! entered or cloned, never both.

use std::collections::BTreeMap;
use std::path::PathBuf;

use isolon_common::error::{IsolonError, Result};
use isolon_common::protocol::ContainerLaunchInfo;
use isolon_common::types::Namespace;

/// Incrementally merges partial launch infos, tracking who set what.
#[derive(Debug, Default)]
pub struct LaunchInfoMerger {
    merged: ContainerLaunchInfo,
    owners: BTreeMap<&'static str, String>,
    namespace_owners: BTreeMap<Namespace, String>,
}

fn set_scalar<T: PartialEq>(
    slot: &mut Option<T>,
    value: Option<T>,
    field: &'static str,
    isolator: &str,
    owners: &mut BTreeMap<&'static str, String>,
) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    match slot {
        None => {
            *slot = Some(value);
            let _ = owners.insert(field, isolator.to_string());
            Ok(())
        }
        Some(existing) if *existing == value => Ok(()),
        Some(_) => Err(IsolonError::ConflictingIsolatorOutput {
            field,
            isolator: isolator.to_string(),
            previous: owners.get(field).cloned().unwrap_or_default(),
        }),
    }
}

fn non_empty_path(path: Option<PathBuf>) -> Option<PathBuf> {
    path.filter(|p| !p.as_os_str().is_empty())
}

fn non_empty_string(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl LaunchInfoMerger {
    /// Creates an empty merger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one isolator's output into the merged descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`IsolonError::ConflictingIsolatorOutput`] when a scalar was
    /// already set to a different value, or a namespace kind would be both
    /// entered and cloned.
    pub fn merge(&mut self, isolator: &str, info: ContainerLaunchInfo) -> Result<()> {
        let ContainerLaunchInfo {
            pre_exec_commands,
            environment,
            rootfs,
            enter_namespaces,
            clone_namespaces,
            user,
            working_directory,
            capabilities,
            rlimits,
            tty_slave_path,
        } = info;

        let owners = &mut self.owners;
        set_scalar(&mut self.merged.rootfs, non_empty_path(rootfs), "rootfs", isolator, owners)?;
        set_scalar(&mut self.merged.user, non_empty_string(user), "user", isolator, owners)?;
        set_scalar(
            &mut self.merged.working_directory,
            non_empty_path(working_directory),
            "working_directory",
            isolator,
            owners,
        )?;
        set_scalar(
            &mut self.merged.tty_slave_path,
            non_empty_path(tty_slave_path),
            "tty_slave_path",
            isolator,
            owners,
        )?;

        self.add_namespaces(isolator, enter_namespaces, true)?;
        self.add_namespaces(isolator, clone_namespaces, false)?;

        self.merged.pre_exec_commands.extend(pre_exec_commands);
        self.merged.environment.extend(environment);
        self.merged.capabilities.extend(capabilities);
        self.merged.rlimits.extend(rlimits);
        Ok(())
    }

    fn add_namespaces(&mut self, isolator: &str, kinds: Vec<Namespace>, enter: bool) -> Result<()> {
        for kind in kinds {
            let (target, other) = if enter {
                (&mut self.merged.enter_namespaces, &self.merged.clone_namespaces)
            } else {
                (&mut self.merged.clone_namespaces, &self.merged.enter_namespaces)
            };
            if other.contains(&kind) {
                return Err(IsolonError::ConflictingIsolatorOutput {
                    field: if enter { "enter_namespaces" } else { "clone_namespaces" },
                    isolator: isolator.to_string(),
                    previous: self.namespace_owners.get(&kind).cloned().unwrap_or_default(),
                });
            }
            if !target.contains(&kind) {
                target.push(kind);
                let _ = self.namespace_owners.insert(kind, isolator.to_string());
            }
        }
        Ok(())
    }

    /// Returns the merged descriptor.
    #[must_use]
    pub fn finish(self) -> ContainerLaunchInfo {
        self.merged
    }
}

/// Merges a sequence of `(isolator, output)` pairs in order.
///
/// # Errors
///
/// Returns the first conflict encountered.
pub fn merge_all<'a, I>(outputs: I) -> Result<ContainerLaunchInfo>
where
    I: IntoIterator<Item = (&'a str, ContainerLaunchInfo)>,
{
    let mut merger = LaunchInfoMerger::new();
    for (isolator, info) in outputs {
        merger.merge(isolator, info)?;
    }
    Ok(merger.finish())
}
