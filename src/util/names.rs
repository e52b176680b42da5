// src/util/names.rs
use std::collections::HashMap;

#[cfg(unix)]
use std::ffi::CStr;

/// Cache of uid -> username and gid -> group name lookups.
#[derive(Default)]
pub struct NameCache {
    users: HashMap<u32, String>,
    groups: HashMap<u32, String>,
}

impl NameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&mut self, uid: u32) -> String {
        if let Some(u) = self.users.get(&uid) {
            return u.clone();
        }
        let name = username_from_uid(uid);
        self.users.insert(uid, name.clone());
        name
    }

    pub fn group(&mut self, gid: u32) -> String {
        if let Some(g) = self.groups.get(&gid) {
            return g.clone();
        }
        let name = groupname_from_gid(gid);
        self.groups.insert(gid, name.clone());
        name
    }
}

#[cfg(unix)]
pub fn username_from_uid(uid: u32) -> String {
    unsafe {
        let passwd = libc::getpwuid(uid);
        if passwd.is_null() {
            return uid.to_string();
        }
        let name_ptr = (*passwd).pw_name;
        if name_ptr.is_null() {
            return uid.to_string();
        }
        match CStr::from_ptr(name_ptr).to_str() {
            Ok(name) => name.to_string(),
            Err(_) => uid.to_string(),
        }
    }
}

#[cfg(not(unix))]
pub fn username_from_uid(uid: u32) -> String {
    uid.to_string()
}

#[cfg(unix)]
pub fn groupname_from_gid(gid: u32) -> String {
    unsafe {
        let group = libc::getgrgid(gid);
        if group.is_null() {
            return gid.to_string();
        }
        let name_ptr = (*group).gr_name;
        if name_ptr.is_null() {
            return gid.to_string();
        }
        match CStr::from_ptr(name_ptr).to_str() {
            Ok(name) => name.to_string(),
            Err(_) => gid.to_string(),
        }
    }
}

#[cfg(not(unix))]
pub fn groupname_from_gid(gid: u32) -> String {
    gid.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_is_stable() {
        let mut cache = NameCache::new();
        let first = cache.user(0);
        let second = cache.user(0);
        assert_eq!(first, second);

        let g1 = cache.group(0);
        let g2 = cache.group(0);
        assert_eq!(g1, g2);
    }

    #[test]
    fn unknown_ids_fall_back_to_numeric() {
        let mut cache = NameCache::new();
        // uid unlikely to exist on any test machine
        let name = cache.user(u32::MAX - 7);
        assert!(!name.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn root_resolves_on_unix() {
        assert_eq!(username_from_uid(0), "root");
    }
}
