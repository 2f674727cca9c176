use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::cache::{CacheError, LocalCache};
use crate::model::view_state::SortState;

const SORT_KEY: &str = "view.sort";
const COLLAPSED_KEY: &str = "view.collapsed";
const PROFILE_KEY: &str = "user.profile";

/// How long a fetched user profile stays valid in the cache.
pub const PROFILE_TTL: Duration = Duration::from_secs(60 * 60);

/// Current user profile, as cached locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Last-used sort, if one was saved.
pub fn read_sort(cache: &mut LocalCache) -> Option<SortState> {
    cache.get(SORT_KEY)
}

pub fn write_sort(cache: &mut LocalCache, sort: &SortState) -> Result<(), CacheError> {
    cache.set(SORT_KEY, sort, None)
}

pub fn clear_sort(cache: &mut LocalCache) {
    cache.remove(SORT_KEY);
}

/// Column key → collapsed flag.
pub fn read_collapsed(cache: &mut LocalCache) -> BTreeMap<String, bool> {
    cache.get(COLLAPSED_KEY).unwrap_or_default()
}

pub fn set_collapsed(
    cache: &mut LocalCache,
    column: &str,
    collapsed: bool,
) -> Result<(), CacheError> {
    let mut flags = read_collapsed(cache);
    if collapsed {
        flags.insert(column.to_string(), true);
    } else {
        flags.remove(column);
    }
    cache.set(COLLAPSED_KEY, &flags, None)
}

/// Cached profile; `None` when missing or older than [`PROFILE_TTL`].
pub fn read_profile(cache: &mut LocalCache) -> Option<UserProfile> {
    cache.get(PROFILE_KEY)
}

pub fn write_profile(cache: &mut LocalCache, profile: &UserProfile) -> Result<(), CacheError> {
    cache.set(PROFILE_KEY, profile, Some(PROFILE_TTL))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::view_state::{SortDirection, SortField};
    use tempfile::TempDir;

    #[test]
    fn sort_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut cache = LocalCache::open(&dir.path().join(".cache.json"));
        assert!(read_sort(&mut cache).is_none());
        let sort = SortState {
            field: SortField::OwnerName,
            direction: SortDirection::Asc,
        };
        write_sort(&mut cache, &sort).unwrap();
        assert_eq!(read_sort(&mut cache), Some(sort));
        clear_sort(&mut cache);
        assert!(read_sort(&mut cache).is_none());
    }

    #[test]
    fn collapsed_flags_toggle() {
        let dir = TempDir::new().unwrap();
        let mut cache = LocalCache::open(&dir.path().join(".cache.json"));
        set_collapsed(&mut cache, "s1", true).unwrap();
        set_collapsed(&mut cache, "unassigned", true).unwrap();
        set_collapsed(&mut cache, "s1", false).unwrap();
        let flags = read_collapsed(&mut cache);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags.get("unassigned"), Some(&true));
    }

    #[test]
    fn profile_is_cached() {
        let dir = TempDir::new().unwrap();
        let mut cache = LocalCache::open(&dir.path().join(".cache.json"));
        let profile = UserProfile {
            id: "u-1".into(),
            name: "Dana".into(),
            email: None,
        };
        write_profile(&mut cache, &profile).unwrap();
        assert_eq!(read_profile(&mut cache), Some(profile));
    }
}
