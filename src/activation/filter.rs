//! Activation filter.
//!
//! Decides whether a volume may be activated on this host from the host's
//! tags and the optional `volume_list` allow-list. The decision is a pure
//! function of its inputs; nothing is queried.

use crate::config::Config;
use crate::metadata::LvRef;
use tracing::{error, info};

/// Host-side inputs to the activation filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPolicy {
    pub host_tags: Vec<String>,
    pub volume_list: Option<Vec<String>>,
}

impl FilterPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host_tags: config.host_tags.clone(),
            volume_list: config.volume_list.clone(),
        }
    }

    /// Whether `lv` may be activated on this host.
    pub fn passes(&self, lv: &LvRef<'_>) -> bool {
        passes_activation_filter(
            &lv.vg.name,
            lv.name(),
            &lv.vg.tags,
            &lv.lv.tags,
            &self.host_tags,
            self.volume_list.as_deref(),
        )
    }
}

/// Activation filter decision.
///
/// Without an allow-list, a host with no tags activates everything and a
/// tagged host activates volumes sharing a tag with it (on the volume or
/// its group). With an allow-list, the first matching entry allows:
/// - `@*`: any host tag is also a volume or group tag
/// - `@tag`: the volume or its group carries `tag`
/// - `vg`: the volume lives in group `vg`
/// - `vg/lv`: exact volume name
///
/// Empty entries are skipped. No match denies.
pub fn passes_activation_filter(
    vg_name: &str,
    lv_name: &str,
    vg_tags: &[String],
    lv_tags: &[String],
    host_tags: &[String],
    volume_list: Option<&[String]>,
) -> bool {
    let host_tag_matches = || {
        host_tags
            .iter()
            .any(|tag| lv_tags.contains(tag) || vg_tags.contains(tag))
    };

    let Some(entries) = volume_list else {
        if host_tags.is_empty() || host_tag_matches() {
            return true;
        }
        info!(vg = vg_name, lv = lv_name, "no host tag matches volume");
        return false;
    };

    for entry in entries {
        if entry.is_empty() {
            error!("ignoring empty string in activation volume_list");
            continue;
        }

        if let Some(tag) = entry.strip_prefix('@') {
            if tag.is_empty() {
                error!("ignoring empty tag in activation volume_list");
                continue;
            }
            if tag == "*" {
                if host_tag_matches() {
                    return true;
                }
                continue;
            }
            if lv_tags.iter().any(|t| t == tag) || vg_tags.iter().any(|t| t == tag) {
                return true;
            }
            continue;
        }

        match entry.split_once('/') {
            None if entry == vg_name => return true,
            Some((vg, lv)) if vg == vg_name && lv == lv_name => return true,
            _ => {}
        }
    }

    info!(
        vg = vg_name,
        lv = lv_name,
        "no item in activation volume_list matches volume"
    );
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_no_list_and_no_host_tags_allows_everything() {
        assert!(passes_activation_filter("vg0", "lv0", &[], &[], &[], None));
    }

    #[test]
    fn test_no_list_requires_shared_tag() {
        let host = tags(&["web"]);
        assert!(passes_activation_filter("vg0", "lv0", &[], &tags(&["web"]), &host, None));
        assert!(passes_activation_filter("vg0", "lv0", &tags(&["web"]), &[], &host, None));
        assert!(!passes_activation_filter("vg0", "lv0", &tags(&["db"]), &tags(&["db"]), &host, None));
    }

    #[test]
    fn test_tag_entry_matches_volume_tag() {
        let list = tags(&["@web", "vg1/lv1"]);
        let host = tags(&["web"]);
        assert!(passes_activation_filter(
            "vg1",
            "lv2",
            &[],
            &tags(&["web"]),
            &host,
            Some(&list)
        ));
    }

    #[test]
    fn test_exact_name_must_match_group_too() {
        let list = tags(&["@web", "vg1/lv1"]);
        let host = tags(&["web"]);
        assert!(!passes_activation_filter("vg2", "lv1", &[], &[], &host, Some(&list)));
        assert!(passes_activation_filter("vg1", "lv1", &[], &[], &host, Some(&list)));
    }

    #[test]
    fn test_tag_entry_matches_group_tag() {
        let list = tags(&["@db"]);
        assert!(passes_activation_filter("vg0", "lv0", &tags(&["db"]), &[], &[], Some(&list)));
        assert!(!passes_activation_filter("vg0", "lv0", &[], &tags(&["web"]), &[], Some(&list)));
    }

    #[test]
    fn test_wildcard_tag_needs_host_intersection() {
        let list = tags(&["@*"]);
        let host = tags(&["rack1"]);
        assert!(passes_activation_filter("vg0", "lv0", &[], &tags(&["rack1"]), &host, Some(&list)));
        assert!(!passes_activation_filter("vg0", "lv0", &[], &tags(&["rack2"]), &host, Some(&list)));
        assert!(!passes_activation_filter("vg0", "lv0", &[], &tags(&["rack1"]), &[], Some(&list)));
    }

    #[test]
    fn test_bare_group_name_allows_all_volumes() {
        let list = tags(&["vg0"]);
        assert!(passes_activation_filter("vg0", "anything", &[], &[], &[], Some(&list)));
        assert!(!passes_activation_filter("vg00", "anything", &[], &[], &[], Some(&list)));
    }

    #[test]
    fn test_empty_entries_are_skipped() {
        let list = tags(&["", "@", "vg0"]);
        assert!(passes_activation_filter("vg0", "lv0", &[], &[], &[], Some(&list)));
        let list = tags(&["", "@"]);
        assert!(!passes_activation_filter("vg0", "lv0", &[], &[], &[], Some(&list)));
    }

    #[test]
    fn test_empty_list_denies() {
        let list: Vec<String> = Vec::new();
        assert!(!passes_activation_filter("vg0", "lv0", &[], &[], &[], Some(&list)));
    }
}
