use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::models::OrgId;

pub const FALLBACK_ORGS: [&str; 3] = ["org1", "org2", "org3"];

/// Reduces a login name to its map key: `DOMAIN\user` and `user@domain` keep
/// only the user part, which is lowercased down to `[a-z0-9]`.
pub fn normalize_user(raw: &str) -> String {
    let mut user = raw.trim();
    if let Some((_, rest)) = user.rsplit_once('\\') {
        user = rest;
    }
    if let Some((name, _)) = user.split_once('@') {
        user = name;
    }
    user.chars()
        .filter(|c| *c != '"' && *c != '\'')
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

/// User to organization assignments read from a `user,org` CSV.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrgDirectory {
    users: BTreeMap<String, OrgId>,
}

impl OrgDirectory {
    pub fn parse<R: Read>(reader: R) -> anyhow::Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut users = BTreeMap::new();
        for (index, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("failed to read usermap line {}", index + 1))?;
            let user = record.get(0).unwrap_or_default().trim_start_matches('\u{feff}').trim();
            let org = record.get(1).unwrap_or_default();
            if index == 0 && user.eq_ignore_ascii_case("user") && org.eq_ignore_ascii_case("org") {
                continue;
            }
            let key = normalize_user(user);
            if key.is_empty() || org.is_empty() {
                warn!(line = index + 1, "skipping incomplete usermap entry");
                continue;
            }
            users.insert(key, org.to_lowercase());
        }
        Ok(Self { users })
    }

    /// Reads the usermap; a missing or unreadable file yields an empty directory.
    pub async fn load(path: &Path) -> Self {
        let parsed = match tokio::fs::read(path).await {
            Ok(bytes) => Self::parse(bytes.as_slice()),
            Err(err) => Err(anyhow::Error::new(err)),
        };
        match parsed {
            Ok(directory) => {
                info!(path = %path.display(), users = directory.users.len(), "loaded usermap");
                directory
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "could not load usermap");
                Self::default()
            }
        }
    }

    pub fn org_for_user(&self, user: &str) -> Option<&str> {
        self.users.get(&normalize_user(user)).map(String::as_str)
    }

    /// Sorted unique organization ids, or the three placeholder organizations
    /// when the map names none.
    pub fn all_org_ids(&self) -> Vec<OrgId> {
        let ids: BTreeSet<&OrgId> = self.users.values().collect();
        if ids.is_empty() {
            warn!("no organizations in usermap, falling back to {:?}", FALLBACK_ORGS);
            return FALLBACK_ORGS.iter().map(|id| id.to_string()).collect();
        }
        ids.into_iter().cloned().collect()
    }

    /// The acting organization: an explicit id, else the user's mapped
    /// organization, else the first listed one.
    pub fn resolve_current(&self, explicit: Option<&str>, user: Option<&str>) -> OrgId {
        let all = self.all_org_ids();
        let resolved = explicit
            .map(|org| org.trim().to_lowercase())
            .filter(|org| !org.is_empty())
            .or_else(|| {
                let user = user?;
                let org = self.org_for_user(user);
                if org.is_none() {
                    warn!(user, "user is not in the usermap");
                }
                org.map(str::to_string)
            })
            .or_else(|| all.first().cloned())
            .unwrap_or_else(|| FALLBACK_ORGS[0].to_string());

        if !all.contains(&resolved) {
            warn!(org = %resolved, "acting organization is not listed in the usermap");
        }
        debug!(org = %resolved, "resolved acting organization");
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USERMAP: &str = "\u{feff}user,org\n\
        # district staff\n\
        CORP\\Jane.Doe,Org2\n\
        \"sam@district.org\",org1\n\
        incomplete,\n\
        kim, org2 \n";

    fn directory() -> OrgDirectory {
        OrgDirectory::parse(USERMAP.as_bytes()).unwrap()
    }

    #[test]
    fn user_names_are_normalized() {
        assert_eq!(normalize_user("CORP\\Jane.Doe"), "janedoe");
        assert_eq!(normalize_user(" jane.doe@corp.example "), "janedoe");
        assert_eq!(normalize_user("'Sam'"), "sam");
    }

    #[test]
    fn usermap_skips_header_comments_and_incomplete_lines() {
        let directory = directory();
        assert_eq!(directory.org_for_user("jane.doe@corp.example"), Some("org2"));
        assert_eq!(directory.org_for_user("SAM"), Some("org1"));
        assert_eq!(directory.org_for_user("incomplete"), None);
        assert_eq!(directory.org_for_user("user"), None);
        assert_eq!(directory.all_org_ids(), ["org1", "org2"]);
    }

    #[test]
    fn empty_usermap_lists_placeholder_orgs() {
        assert_eq!(OrgDirectory::default().all_org_ids(), FALLBACK_ORGS);
    }

    #[test]
    fn current_org_resolution_order() {
        let directory = directory();
        assert_eq!(directory.resolve_current(Some(" ORG3 "), Some("kim")), "org3");
        assert_eq!(directory.resolve_current(None, Some("kim")), "org2");
        assert_eq!(directory.resolve_current(None, Some("nobody")), "org1");
        assert_eq!(directory.resolve_current(None, None), "org1");
    }

    #[tokio::test]
    async fn missing_usermap_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = OrgDirectory::load(&dir.path().join("usermap.csv")).await;
        assert_eq!(loaded, OrgDirectory::default());

        let path = dir.path().join("present.csv");
        std::fs::write(&path, USERMAP).unwrap();
        assert_eq!(OrgDirectory::load(&path).await, directory());
    }
}
