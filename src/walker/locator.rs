//! Where an item lives and how to recognise its file.
//!
//! The default policy matches indexes split into one folder per first
//! character (`Packages/n/nano-6.2-1.el9.x86_64.rpm`).

use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::{Action, Page, Target};

/// Compiled size cap for a file-name pattern.
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// Pluggable placement and matching rules for the walker.
pub trait Locator {
    /// Reject items this locator can never handle, before a walk is stored.
    fn check(&self, _item: &str) -> Result<()> {
        Ok(())
    }

    /// Is the environment already where `item` can be found?
    fn environment_matches(&self, item: &str, page: &Page) -> bool;

    /// Where to go when it is not.
    fn transition(&self, item: &str) -> Action;

    /// First link on `page` that is a download target for `item`, in document order.
    fn locate_target(&self, item: &str, page: &Page) -> Option<Target>;
}

/// First-character folders, files named `<item>-<anything><extension>`.
#[derive(Debug, Clone)]
pub struct FolderLocator {
    extension: String,
}

impl FolderLocator {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
        }
    }

    /// Folder name for an item: its first character, lowercased.
    pub fn folder_for(item: &str) -> String {
        item.chars()
            .next()
            .map(|c| c.to_lowercase().collect())
            .unwrap_or_default()
    }

    fn pattern_for(&self, item: &str) -> Result<Regex> {
        let pattern = format!(
            "^{}-.*{}$",
            regex::escape(item),
            regex::escape(&self.extension)
        );
        RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .size_limit(PATTERN_SIZE_LIMIT)
            .build()
            .map_err(|e| Error::InvalidItem {
                item: item.to_string(),
                reason: e.to_string(),
            })
    }
}

impl Default for FolderLocator {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EXTENSION)
    }
}

impl Locator for FolderLocator {
    fn environment_matches(&self, item: &str, page: &Page) -> bool {
        let folder = Self::folder_for(item);
        let last_segment = page
            .location
            .trim_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("");
        !folder.is_empty() && last_segment.to_lowercase() == folder
    }

    fn transition(&self, item: &str) -> Action {
        Action::Navigate {
            location: format!("{}/", Self::folder_for(item)),
        }
    }

    fn check(&self, item: &str) -> Result<()> {
        self.pattern_for(item).map(|_| ())
    }

    fn locate_target(&self, item: &str, page: &Page) -> Option<Target> {
        let re = match self.pattern_for(item) {
            Ok(re) => re,
            Err(e) => {
                warn!(item, %e, "cannot build file pattern");
                return None;
            }
        };
        page.links
            .iter()
            .find(|link| re.is_match(&link.file_name))
            .map(Target::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Link;

    fn page(location: &str, names: &[&str]) -> Page {
        Page {
            location: location.to_string(),
            links: names
                .iter()
                .map(|name| Link {
                    url: format!("https://mirror.test/Packages/{location}{name}"),
                    file_name: name.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn folder_is_lowercased_first_character() {
        assert_eq!(FolderLocator::folder_for("nano"), "n");
        assert_eq!(FolderLocator::folder_for("NetworkManager"), "n");
        assert_eq!(FolderLocator::folder_for("7zip"), "7");
    }

    #[test]
    fn environment_matches_on_last_path_segment() {
        let locator = FolderLocator::default();
        assert!(locator.environment_matches("nano", &page("n/", &[])));
        assert!(locator.environment_matches("nano", &page("/Packages/n", &[])));
        assert!(locator.environment_matches("Nano", &page("N/", &[])));
        assert!(!locator.environment_matches("nano", &page("", &[])));
        assert!(!locator.environment_matches("nano", &page("v/", &[])));
        assert!(!locator.environment_matches("nano", &page("nn/", &[])));
    }

    #[test]
    fn transition_navigates_to_item_folder() {
        let locator = FolderLocator::default();
        assert_eq!(
            locator.transition("vim"),
            Action::Navigate {
                location: "v/".to_string()
            }
        );
    }

    #[test]
    fn first_matching_link_in_document_order_wins() {
        let locator = FolderLocator::default();
        let listing = page(
            "n/",
            &[
                "../",
                "nano-6.2-1.el9.x86_64.rpm",
                "nano-doc-6.2-1.el9.rpm",
            ],
        );
        let target = locator.locate_target("nano", &listing).unwrap();
        assert_eq!(target.file_name, "nano-6.2-1.el9.x86_64.rpm");
        assert_eq!(
            target.url,
            "https://mirror.test/Packages/n/nano-6.2-1.el9.x86_64.rpm"
        );
    }

    #[test]
    fn match_requires_dash_after_name_and_extension() {
        let locator = FolderLocator::default();
        let listing = page(
            "n/",
            &["nanosecond-1.0.rpm", "nano.rpm", "nano-6.2.src.tar.gz"],
        );
        assert!(locator.locate_target("nano", &listing).is_none());
    }

    #[test]
    fn match_is_case_insensitive_and_escapes_item() {
        let locator = FolderLocator::default();
        let listing = page("l/", &["LIBSTDC++-DEVEL-11.rpm", "libstdcxx-devel-11.rpm"]);
        let target = locator.locate_target("libstdc++-devel", &listing).unwrap();
        assert_eq!(target.file_name, "LIBSTDC++-DEVEL-11.rpm");
    }

    #[test]
    fn locate_is_deterministic() {
        let locator = FolderLocator::default();
        let listing = page("v/", &["vim-common-9.0.rpm", "vim-enhanced-9.0.rpm"]);
        let first = locator.locate_target("vim", &listing);
        for _ in 0..5 {
            assert_eq!(locator.locate_target("vim", &listing), first);
        }
    }

    #[test]
    fn custom_extension_is_honoured() {
        let locator = FolderLocator::new(".deb");
        let listing = page("n/", &["nano-6.2.rpm", "nano-6.2_amd64.deb"]);
        let target = locator.locate_target("nano", &listing).unwrap();
        assert_eq!(target.file_name, "nano-6.2_amd64.deb");
    }

    #[test]
    fn check_rejects_names_too_large_for_a_pattern() {
        let locator = FolderLocator::default();
        assert!(locator.check("libstdc++-devel").is_ok());

        let huge = "a".repeat(1_000_000);
        assert!(matches!(
            locator.check(&huge),
            Err(Error::InvalidItem { .. })
        ));
    }
}
