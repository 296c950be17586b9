// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! Interface to an optional privileged host-side collaborator that
//! hides root-related paths from a bounded set of target processes on
//! a running device. The hiding mechanism itself is someone else's
//! problem -- this only owns the lifecycle and the target-PID registry.

use std::sync::Mutex;

const MAX_TARGETS: usize = 32;

const HIDDEN_PATHS: &[&str] = &["/su", "/magisk", "ksu", "busybox", "/dev/deepeye"];

#[derive(Debug, PartialEq, Eq)]
pub enum CollaboratorError {
    NotInitialized,
    AlreadyInitialized,
    TargetListFull,
    UnknownTarget,
}

struct State {
    targets: Vec<u32>,
}

/// Guards the one piece of process-wide mutable state this crate has.
/// Everything else is confined to a session.
pub struct Collaborator {
    state: Mutex<Option<State>>,
}

impl Default for Collaborator {
    fn default() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }
}

impl Collaborator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&self) -> Result<(), CollaboratorError> {
        let mut guard = self.state.lock().unwrap();
        if guard.is_some() {
            return Err(CollaboratorError::AlreadyInitialized);
        }
        *guard = Some(State { targets: Vec::new() });
        Ok(())
    }

    pub fn teardown(&self) -> Result<(), CollaboratorError> {
        let mut guard = self.state.lock().unwrap();
        if guard.take().is_none() {
            return Err(CollaboratorError::NotInitialized);
        }
        Ok(())
    }

    pub fn add_target(&self, pid: u32) -> Result<(), CollaboratorError> {
        let mut guard = self.state.lock().unwrap();
        let state = guard.as_mut().ok_or(CollaboratorError::NotInitialized)?;
        if state.targets.len() >= MAX_TARGETS {
            return Err(CollaboratorError::TargetListFull);
        }
        if !state.targets.contains(&pid) {
            state.targets.push(pid);
        }
        Ok(())
    }

    pub fn remove_target(&self, pid: u32) -> Result<(), CollaboratorError> {
        let mut guard = self.state.lock().unwrap();
        let state = guard.as_mut().ok_or(CollaboratorError::NotInitialized)?;
        let before = state.targets.len();
        state.targets.retain(|&p| p != pid);
        if state.targets.len() == before {
            return Err(CollaboratorError::UnknownTarget);
        }
        Ok(())
    }

    /// Whether `path` should be hidden from `pid`. False for any pid
    /// that was never registered, and for any path not on the fixed
    /// hidden-path list.
    pub fn is_path_hidden(&self, pid: u32, path: &str) -> Result<bool, CollaboratorError> {
        let guard = self.state.lock().unwrap();
        let state = guard.as_ref().ok_or(CollaboratorError::NotInitialized)?;
        if !state.targets.contains(&pid) {
            return Ok(false);
        }
        Ok(HIDDEN_PATHS.iter().any(|&p| path.contains(p)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_use_before_init() {
        let c = Collaborator::new();
        assert_eq!(c.add_target(123), Err(CollaboratorError::NotInitialized));
    }

    #[test]
    fn hides_only_for_registered_targets() {
        let c = Collaborator::new();
        c.init().unwrap();
        c.add_target(42).unwrap();

        assert_eq!(c.is_path_hidden(42, "/su").unwrap(), true);
        assert_eq!(c.is_path_hidden(99, "/su").unwrap(), false);
        assert_eq!(c.is_path_hidden(42, "/etc/hosts").unwrap(), false);
    }

    #[test]
    fn bounds_target_list_at_32() {
        let c = Collaborator::new();
        c.init().unwrap();
        for pid in 0..MAX_TARGETS as u32 {
            c.add_target(pid).unwrap();
        }
        assert_eq!(c.add_target(9999), Err(CollaboratorError::TargetListFull));
    }
}
