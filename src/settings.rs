use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::rc::Rc;

/// Server-pushed gate: user scripts may not run on this server.
pub const FORBID_USER_SCRIPTS: &str = "_forbidUserScripts";
/// Server-pushed gate: the community module may not run on this server.
pub const FORBID_COMMUNITY_SCRIPTS: &str = "_forbidCommunityScripts";

/// Key/value settings store shared by the host and the guest modules. Keys
/// starting with `_` are server-owned. Mutations are queued so the
/// supervisor can turn them into `SettingChange` call-ins between ticks
/// instead of dispatching from inside a running guest.
#[derive(Debug, Default)]
pub struct Settings {
    values: HashMap<String, String>,
    changed: Vec<String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn is_true(&self, key: &str) -> bool {
        match self.get(key) {
            Some(value) => {
                let value = value.trim();
                value.eq_ignore_ascii_case("true")
                    || value.eq_ignore_ascii_case("yes")
                    || value.eq_ignore_ascii_case("on")
                    || value.parse::<i64>().map_or(false, |n| n != 0)
            }
            None => false,
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.values.insert(key.clone(), value.into());
        self.changed.push(key);
    }

    pub fn remove(&mut self, key: &str) -> bool {
        if self.values.remove(key).is_some() {
            self.changed.push(key.to_string());
            return true;
        }
        false
    }

    pub fn drain_changes(&mut self) -> Vec<String> {
        std::mem::take(&mut self.changed)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Shared handle cloned into guest-facing call-outs.
#[derive(Clone, Default)]
pub struct SettingsHandle {
    inner: Rc<RefCell<Settings>>,
}

impl SettingsHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn borrow(&self) -> Ref<'_, Settings> {
        self.inner.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Settings> {
        self.inner.borrow_mut()
    }
}
