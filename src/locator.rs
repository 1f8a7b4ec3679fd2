//! Build and beta-group lookups for one app.
use crate::api::AppStoreApi;
use crate::model::{decode_beta_groups, decode_builds, BetaGroup, Build};
use anyhow::{anyhow, Result};

/// Read-only queries against the builds and beta groups of a single app.
pub struct BuildLocator<'a, A: ?Sized> {
    api: &'a A,
    app_id: &'a str,
}

impl<'a, A: AppStoreApi + ?Sized> BuildLocator<'a, A> {
    pub fn new(api: &'a A, app_id: &'a str) -> Self {
        Self { api, app_id }
    }

    /// Most recently uploaded builds, newest first.
    pub fn list_recent_builds(&self, limit: usize) -> Result<Vec<Build>> {
        let path = format!(
            "/v1/builds?filter[app]={}&sort=-uploadedDate&limit={}&include=preReleaseVersion",
            self.app_id,
            limit.clamp(1, 200)
        );
        self.fetch_builds(&path)
    }

    /// Every build whose version matches, newest first.
    pub fn list_builds_by_version(&self, version: &str) -> Result<Vec<Build>> {
        validate_version_filter(version)?;
        let path = format!(
            "/v1/builds?filter[app]={}&filter[version]={}&sort=-uploadedDate&include=preReleaseVersion",
            self.app_id, version
        );
        self.fetch_builds(&path)
    }

    pub fn list_beta_groups(&self) -> Result<Vec<BetaGroup>> {
        let path = format!("/v1/apps/{}/betaGroups", self.app_id);
        let doc = self
            .api
            .get(&path)
            .ok_or_else(|| anyhow!("could not fetch beta groups for app {}", self.app_id))?;
        decode_beta_groups(&doc)
    }

    /// The group with a public TestFlight link; see [`select_public_group`].
    pub fn find_public_beta_group(&self) -> Result<Option<BetaGroup>> {
        select_public_group(&self.list_beta_groups()?)
    }

    fn fetch_builds(&self, path: &str) -> Result<Vec<Build>> {
        let doc = self
            .api
            .get(path)
            .ok_or_else(|| anyhow!("could not fetch builds for app {}", self.app_id))?;
        decode_builds(&doc)
    }
}

/// Pick the group with a public TestFlight link out of `groups`.
///
/// `Ok(None)` when no group is public. More than one public group is an
/// error: the workflow will not guess which link testers are using.
pub fn select_public_group(groups: &[BetaGroup]) -> Result<Option<BetaGroup>> {
    let public: Vec<&BetaGroup> = groups
        .iter()
        .filter(|group| group.public_link_enabled)
        .collect();
    match public.as_slice() {
        [] => Ok(None),
        [group] => Ok(Some((*group).clone())),
        many => Err(anyhow!(
            "found {} public beta groups ({}); disable the public link on all but one",
            many.len(),
            many.iter()
                .map(|group| format!("{} ({})", group.name, group.id))
                .collect::<Vec<_>>()
                .join(", ")
        )),
    }
}

/// Versions go into the query string unescaped, so keep them to the
/// characters build numbers and marketing versions actually use.
fn validate_version_filter(version: &str) -> Result<()> {
    let valid = !version.is_empty()
        && version
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_'));
    if !valid {
        return Err(anyhow!(
            "version {version:?} may only contain letters, digits, '.', '-' and '_'"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Platform;
    use crate::test_support::{build_json, builds_doc, groups_doc, ScriptedApi};

    #[test]
    fn finds_the_single_public_group() {
        let api = ScriptedApi::new();
        api.on_get(
            "/v1/apps/app-1/betaGroups",
            groups_doc(&[("g1", "Internal", false), ("g2", "Public Testers", true)]),
        );
        let locator = BuildLocator::new(&api, "app-1");

        let group = locator
            .find_public_beta_group()
            .expect("lookup")
            .expect("public group");
        assert_eq!(group.id, "g2");
        assert_eq!(group.name, "Public Testers");
    }

    #[test]
    fn no_public_group_is_none() {
        let api = ScriptedApi::new();
        api.on_get(
            "/v1/apps/app-1/betaGroups",
            groups_doc(&[("g1", "Internal", false)]),
        );
        let locator = BuildLocator::new(&api, "app-1");
        assert_eq!(locator.find_public_beta_group().expect("lookup"), None);
    }

    #[test]
    fn several_public_groups_fail_loudly() {
        let api = ScriptedApi::new();
        api.on_get(
            "/v1/apps/app-1/betaGroups",
            groups_doc(&[("g1", "Friends", true), ("g2", "Public Testers", true)]),
        );
        let locator = BuildLocator::new(&api, "app-1");
        let err = locator.find_public_beta_group().expect_err("ambiguous");
        let message = err.to_string();
        assert!(message.contains("found 2 public beta groups"), "{message}");
        assert!(message.contains("Friends (g1)"), "{message}");
    }

    #[test]
    fn public_group_is_selected_from_an_existing_listing() {
        let groups = vec![
            BetaGroup {
                id: "g1".to_string(),
                name: "Internal".to_string(),
                public_link_enabled: false,
            },
            BetaGroup {
                id: "g2".to_string(),
                name: "Public Testers".to_string(),
                public_link_enabled: true,
            },
        ];
        let group = select_public_group(&groups)
            .expect("select")
            .expect("public group");
        assert_eq!(group.id, "g2");
        assert_eq!(select_public_group(&groups[..1]).expect("select"), None);
    }

    #[test]
    fn listing_and_selecting_groups_fetches_once() {
        let api = ScriptedApi::new();
        api.on_get(
            "/v1/apps/app-1/betaGroups",
            groups_doc(&[("g1", "Internal", false), ("g2", "Public Testers", true)]),
        );
        let locator = BuildLocator::new(&api, "app-1");

        let groups = locator.list_beta_groups().expect("groups");
        let public = select_public_group(&groups).expect("select");

        assert_eq!(public.map(|group| group.id), Some("g2".to_string()));
        assert_eq!(api.requested_paths().len(), 1);
    }

    #[test]
    fn unreachable_group_listing_is_an_error() {
        let api = ScriptedApi::new();
        let locator = BuildLocator::new(&api, "app-1");
        assert!(locator.find_public_beta_group().is_err());
    }

    #[test]
    fn version_query_filters_by_app_and_version() {
        let api = ScriptedApi::new();
        api.on_get(
            "/v1/builds?filter[app]=app-1&filter[version]=1.2.3",
            builds_doc(vec![build_json("b1", "1.2.3", "IOS", "VALID", None)]),
        );
        let locator = BuildLocator::new(&api, "app-1");
        let builds = locator.list_builds_by_version("1.2.3").expect("builds");
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].platform, Platform::Ios);
        assert!(api
            .requested_paths()
            .iter()
            .any(|path| path.contains("sort=-uploadedDate")));
    }

    #[test]
    fn rejects_versions_that_would_break_the_query_string() {
        let api = ScriptedApi::new();
        let locator = BuildLocator::new(&api, "app-1");
        assert!(locator.list_builds_by_version("1.2&limit=1").is_err());
        assert!(locator.list_builds_by_version("").is_err());
        assert!(api.requested_paths().is_empty());
    }
}
