//! Repository metadata: package names and their dependency closure.
//!
//! `repodata/repomd.xml` points at the primary metadata, which lists every
//! package with the capabilities it provides and requires. Requirements are
//! resolved to package names through the provides table.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::index::{dir_url, fetch_bytes, fetch_text};
use crate::model::Worklist;

/// Location of the repository index, relative to the repository root.
pub const REPOMD_PATH: &str = "repodata/repomd.xml";

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const XZ_MAGIC: [u8; 6] = [0xfd, b'7', b'z', b'X', b'Z', 0x00];

/// Package name -> names of the packages it directly depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Repodata {
    deps: BTreeMap<String, BTreeSet<String>>,
}

impl Repodata {
    /// All package names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.deps.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.deps.contains_key(name)
    }

    /// Names matching any of the shell-style `patterns` (`*`, `?`, `[...]`), sorted.
    pub fn filter<S: AsRef<str>>(&self, patterns: &[S]) -> Result<Vec<String>> {
        let patterns = patterns
            .iter()
            .map(|p| p.as_ref().trim())
            .filter(|p| !p.is_empty())
            .map(wildcard_regex)
            .collect::<Result<Vec<_>>>()?;

        Ok(self
            .names()
            .filter(|name| patterns.iter().any(|re| re.is_match(name)))
            .map(str::to_string)
            .collect())
    }

    /// `name` plus everything it needs, transitively. `None` if the package is unknown.
    pub fn dependencies(&self, name: &str) -> Option<BTreeSet<String>> {
        if !self.contains(name) {
            return None;
        }
        let mut closure = BTreeSet::new();
        let mut queue = VecDeque::from([name.to_string()]);
        while let Some(current) = queue.pop_front() {
            if !closure.insert(current.clone()) {
                continue;
            }
            if let Some(direct) = self.deps.get(&current) {
                queue.extend(direct.iter().filter(|d| !closure.contains(*d)).cloned());
            }
        }
        Some(closure)
    }

    /// Expand a worklist: wildcard items become the matching names, and each
    /// name is followed by its dependencies in name order.
    ///
    /// Names unknown to the repository stay in place; the walker reports them.
    pub fn expand(&self, worklist: &Worklist) -> Result<Worklist> {
        let mut expanded: Vec<String> = Vec::new();

        for item in worklist.items() {
            let names = if is_wildcard(item) {
                let matched = self.filter(&[item])?;
                if matched.is_empty() {
                    warn!(pattern = %item, "pattern matches no package");
                }
                matched
            } else {
                vec![item.clone()]
            };

            for name in names {
                match self.dependencies(&name) {
                    Some(closure) => {
                        debug!(item = %name, deps = closure.len() - 1, "dependencies resolved");
                        expanded.push(name.clone());
                        expanded.extend(closure.into_iter().filter(|dep| *dep != name));
                    }
                    None => {
                        warn!(item = %name, "not in repository metadata");
                        expanded.push(name);
                    }
                }
            }
        }

        Worklist::from_items(expanded)
    }
}

/// Fetch and parse the repository metadata under `repo_url`.
pub async fn fetch(client: &reqwest::Client, repo_url: &str, weak_deps: bool) -> Result<Repodata> {
    let base = dir_url(repo_url)?;

    let repomd_url = base.join(REPOMD_PATH)?;
    let repomd = fetch_text(client, repomd_url.as_str()).await?;
    let primary_url = base.join(&parse_repomd(&repomd)?)?;

    info!(url = %primary_url, "fetching primary metadata");
    let compressed = fetch_bytes(client, primary_url.as_str()).await?;

    let repodata = tokio::task::spawn_blocking(move || {
        let xml = decompress(&compressed)?;
        parse_primary(&xml, weak_deps)
    })
    .await
    .map_err(|e| Error::Other(format!("metadata parser panicked: {e}")))??;

    info!(packages = repodata.len(), "repository metadata loaded");
    Ok(repodata)
}

/// `href` of the primary metadata listed in `repomd.xml`.
pub fn parse_repomd(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_primary = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"data" => {
                in_primary = attr(&e, b"type").as_deref() == Some("primary");
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"data" => in_primary = false,
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if in_primary && e.local_name().as_ref() == b"location" =>
            {
                if let Some(href) = attr(&e, b"href") {
                    return Ok(href);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Other(format!("repomd.xml parse error: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    Err(Error::TargetStructureMissing(
        "repomd.xml lists no primary metadata".to_string(),
    ))
}

/// Dependency section of a `<format>` block currently being read.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Provides,
    Requires,
    Recommends,
}

#[derive(Default)]
struct PackageRecord {
    name: String,
    provides: Vec<String>,
    requires: Vec<String>,
}

/// Build the dependency map from primary metadata.
pub fn parse_primary(xml: &str, weak_deps: bool) -> Result<Repodata> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut records: Vec<PackageRecord> = Vec::new();
    let mut current: Option<PackageRecord> = None;
    let mut in_name = false;
    let mut section = Section::None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"package" => current = Some(PackageRecord::default()),
                b"name" => in_name = current.is_some(),
                b"provides" => section = Section::Provides,
                b"requires" => section = Section::Requires,
                b"recommends" => section = Section::Recommends,
                b"entry" => push_entry(current.as_mut(), section, weak_deps, &e),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"entry" => {
                push_entry(current.as_mut(), section, weak_deps, &e);
            }
            Ok(Event::Text(t)) if in_name => {
                if let Some(record) = current.as_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| Error::Other(format!("primary.xml parse error: {e}")))?;
                    record.name.push_str(text.trim());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"name" => in_name = false,
                b"provides" | b"requires" | b"recommends" => section = Section::None,
                b"package" => {
                    if let Some(record) = current.take().filter(|r| !r.name.is_empty()) {
                        records.push(record);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Other(format!("primary.xml parse error: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    let mut providers: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for record in &records {
        for capability in &record.provides {
            providers
                .entry(capability.as_str())
                .or_default()
                .insert(record.name.as_str());
        }
    }

    let mut deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for record in &records {
        let direct = deps.entry(record.name.clone()).or_default();
        for requirement in &record.requires {
            if let Some(names) = providers.get(requirement.as_str()) {
                direct.extend(
                    names
                        .iter()
                        .filter(|n| **n != record.name)
                        .map(|n| n.to_string()),
                );
            }
        }
    }

    Ok(Repodata { deps })
}

fn push_entry(
    record: Option<&mut PackageRecord>,
    section: Section,
    weak_deps: bool,
    entry: &BytesStart<'_>,
) {
    let (Some(record), Some(name)) = (record, attr(entry, b"name")) else {
        return;
    };
    match section {
        Section::Provides => record.provides.push(name),
        Section::Requires => record.requires.push(name),
        Section::Recommends if weak_deps => record.requires.push(name),
        _ => {}
    }
}

fn attr(element: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Metadata body as text. Zstandard and plain XML are read; other formats are refused.
pub fn decompress(bytes: &[u8]) -> Result<String> {
    let raw = if bytes.starts_with(&ZSTD_MAGIC) {
        zstd::stream::decode_all(bytes)?
    } else if bytes.starts_with(&GZIP_MAGIC) || bytes.starts_with(&XZ_MAGIC) {
        return Err(Error::Other(
            "unsupported metadata compression; expected zstd or plain XML".to_string(),
        ));
    } else {
        bytes.to_vec()
    };
    String::from_utf8(raw).map_err(|e| Error::Other(format!("metadata is not UTF-8: {e}")))
}

fn is_wildcard(item: &str) -> bool {
    item.contains(['*', '?', '['])
}

/// Translate a shell wildcard into an anchored regex.
fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::from("^");
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => {
                let rest = chars.as_str();
                match rest.find(']') {
                    Some(end) if end > 0 => {
                        let class = &rest[..end];
                        re.push('[');
                        match class.strip_prefix('!') {
                            Some(negated) => {
                                re.push('^');
                                re.push_str(&escape_class(negated));
                            }
                            None => re.push_str(&escape_class(class)),
                        }
                        re.push(']');
                        chars = rest[end + 1..].chars();
                    }
                    _ => re.push_str(&regex::escape("[")),
                }
            }
            other => re.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    re.push('$');

    Regex::new(&re).map_err(|e| Error::InvalidItem {
        item: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Keep `-` ranges, escape what regex classes treat specially.
fn escape_class(class: &str) -> String {
    class
        .chars()
        .map(|c| match c {
            '\\' | '[' | ']' | '^' | '&' | '~' => format!("\\{c}"),
            other => other.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPOMD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo" xmlns:rpm="http://linux.duke.edu/metadata/rpm">
  <revision>1700000000</revision>
  <data type="filelists">
    <location href="repodata/abc-filelists.xml.zst"/>
  </data>
  <data type="primary">
    <checksum type="sha256">0123</checksum>
    <location href="repodata/def-primary.xml.zst"/>
  </data>
</repomd>"#;

    const PRIMARY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="5">
<package type="rpm">
  <name>htop</name>
  <version epoch="0" ver="3.2.2" rel="1.el9"/>
  <location href="Packages/h/htop-3.2.2-1.el9.x86_64.rpm"/>
  <format>
    <rpm:provides><rpm:entry name="htop"/></rpm:provides>
    <rpm:requires>
      <rpm:entry name="libncursesw.so.6()(64bit)"/>
      <rpm:entry name="libhwloc.so.15()(64bit)"/>
    </rpm:requires>
    <rpm:recommends><rpm:entry name="lsof"/></rpm:recommends>
  </format>
</package>
<package type="rpm">
  <name>hwloc-libs</name>
  <format>
    <rpm:provides><rpm:entry name="libhwloc.so.15()(64bit)"/></rpm:provides>
    <rpm:requires><rpm:entry name="libudev.so.1()(64bit)"/></rpm:requires>
  </format>
</package>
<package type="rpm">
  <name>systemd-libs</name>
  <format>
    <rpm:provides><rpm:entry name="libudev.so.1()(64bit)"/></rpm:provides>
    <rpm:requires><rpm:entry name="libhwloc.so.15()(64bit)"/></rpm:requires>
  </format>
</package>
<package type="rpm">
  <name>lsof</name>
  <format><rpm:provides><rpm:entry name="lsof"/></rpm:provides></format>
</package>
<package type="rpm">
  <name>htop-doc</name>
</package>
</metadata>"#;

    #[test]
    fn repomd_yields_primary_location() {
        assert_eq!(parse_repomd(REPOMD).unwrap(), "repodata/def-primary.xml.zst");
    }

    #[test]
    fn repomd_without_primary_is_reported() {
        let err = parse_repomd("<repomd><data type=\"other\"/></repomd>").unwrap_err();
        assert!(matches!(err, Error::TargetStructureMissing(_)));
    }

    #[test]
    fn closure_follows_provides_and_survives_cycles() {
        let repo = parse_primary(PRIMARY, false).unwrap();
        assert_eq!(
            repo.names().collect::<Vec<_>>(),
            ["htop", "htop-doc", "hwloc-libs", "lsof", "systemd-libs"]
        );

        let closure = repo.dependencies("htop").unwrap();
        assert_eq!(
            closure.iter().map(String::as_str).collect::<Vec<_>>(),
            ["htop", "hwloc-libs", "systemd-libs"]
        );
        assert_eq!(repo.dependencies("htop-doc").unwrap().len(), 1);
        assert!(repo.dependencies("nonexistent").is_none());
    }

    #[test]
    fn weak_dependencies_are_opt_in() {
        let repo = parse_primary(PRIMARY, true).unwrap();
        assert!(repo.dependencies("htop").unwrap().contains("lsof"));
    }

    #[test]
    fn wildcards_follow_shell_rules() {
        let repo = parse_primary(PRIMARY, false).unwrap();
        assert_eq!(repo.filter(&["htop*"]).unwrap(), ["htop", "htop-doc"]);
        assert_eq!(repo.filter(&["?sof"]).unwrap(), ["lsof"]);
        assert_eq!(
            repo.filter(&["[hs]*-libs", " "]).unwrap(),
            ["hwloc-libs", "systemd-libs"]
        );
        assert_eq!(repo.filter(&["[!h]*"]).unwrap(), ["lsof", "systemd-libs"]);
        assert!(repo.filter(&["HTOP"]).unwrap().is_empty());
        assert!(repo.filter(&["htop."]).unwrap().is_empty());
    }

    #[test]
    fn expand_inserts_dependencies_after_each_item() {
        let repo = parse_primary(PRIMARY, false).unwrap();
        let worklist = Worklist::parse("lsof, htop, mystery, systemd-*").unwrap();

        let expanded = repo.expand(&worklist).unwrap();
        assert_eq!(
            expanded.items(),
            [
                "lsof",
                "htop",
                "hwloc-libs",
                "systemd-libs",
                "mystery"
            ]
        );
    }

    #[test]
    fn expand_of_only_unmatched_patterns_is_empty_input() {
        let repo = parse_primary(PRIMARY, false).unwrap();
        let worklist = Worklist::parse("zz*").unwrap();
        assert!(matches!(repo.expand(&worklist), Err(Error::InputEmpty)));
    }

    #[test]
    fn zstd_and_plain_bodies_decode() {
        let packed = zstd::stream::encode_all(PRIMARY.as_bytes(), 3).unwrap();
        assert_eq!(decompress(&packed).unwrap(), PRIMARY);
        assert_eq!(decompress(PRIMARY.as_bytes()).unwrap(), PRIMARY);
        assert!(decompress(&[0x1f, 0x8b, 0x08, 0x00]).is_err());
    }
}
