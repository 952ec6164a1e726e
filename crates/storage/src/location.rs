// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Storage root addressing: local directories and pre-authenticated requests

use crate::secret::{REDACTED, Secret};
use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// What part of a bucket a grant covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantScope {
    Bucket,
    /// Restricted to object names starting with this prefix (ends in `/`)
    Prefix(String),
}

/// Object operations a PAR was created with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessType {
    AnyObjectRead,
    AnyObjectWrite,
    AnyObjectReadWrite,
}

impl AccessType {
    pub fn can_read(self) -> bool {
        matches!(self, AccessType::AnyObjectRead | AccessType::AnyObjectReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, AccessType::AnyObjectWrite | AccessType::AnyObjectReadWrite)
    }
}

impl std::str::FromStr for AccessType {
    type Err = StorageError;

    fn from_str(text: &str) -> Result<Self> {
        match text {
            "AnyObjectRead" => Ok(AccessType::AnyObjectRead),
            "AnyObjectWrite" => Ok(AccessType::AnyObjectWrite),
            "AnyObjectReadWrite" => Ok(AccessType::AnyObjectReadWrite),
            other => Err(StorageError::InvalidLocation(format!(
                "unknown PAR access type '{other}'"
            ))),
        }
    }
}

/// A parsed pre-authenticated request URL
///
/// Layout: `<origin>/p/<token>/n/<namespace>/b/<bucket>/o/[<prefix>/]`.
/// The token is the credential; everything else is shown in messages.
#[derive(Debug, Clone)]
pub struct ParUrl {
    base: Secret<Url>,
    token: Secret<String>,
    origin: String,
    namespace: String,
    bucket: String,
    prefix: String,
}

impl ParUrl {
    /// Parse a PAR URL. Parse errors never quote the input.
    pub fn parse(text: &str) -> Result<Self> {
        let url = Url::parse(text)
            .map_err(|_| StorageError::InvalidLocation("malformed PAR URL".to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(StorageError::InvalidLocation(format!(
                "unsupported scheme '{}' for a PAR URL",
                url.scheme()
            )));
        }

        let segments: Vec<&str> = url.path().trim_start_matches('/').split('/').collect();
        let well_formed = segments.len() >= 7
            && segments[0] == "p"
            && segments[2] == "n"
            && segments[4] == "b"
            && segments[6] == "o"
            && !segments[1].is_empty()
            && !segments[3].is_empty()
            && !segments[5].is_empty();
        if !well_formed {
            return Err(StorageError::InvalidLocation(
                "not a pre-authenticated request URL".to_string(),
            ));
        }

        let prefix = segments[7..].join("/");
        if !prefix.is_empty() && !prefix.ends_with('/') {
            return Err(StorageError::InvalidLocation(
                "a PAR to a single object cannot address a dump, the PAR must end with '/'"
                    .to_string(),
            ));
        }

        let mut base = url.clone();
        base.set_query(None);
        base.set_fragment(None);
        base.set_path(&format!(
            "/p/{}/n/{}/b/{}",
            segments[1], segments[3], segments[5]
        ));

        Ok(Self {
            base: Secret::new(base),
            token: Secret::new(segments[1].to_string()),
            origin: url.origin().ascii_serialization(),
            namespace: segments[3].to_string(),
            bucket: segments[5].to_string(),
            prefix,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object-name prefix this PAR is scoped to, empty for a bucket PAR
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn scope(&self) -> GrantScope {
        if self.prefix.is_empty() {
            GrantScope::Bucket
        } else {
            GrantScope::Prefix(self.prefix.clone())
        }
    }

    /// Replace any occurrence of the token in service-provided text
    pub(crate) fn scrub(&self, text: &str) -> String {
        text.replace(self.token.as_declassified().as_str(), REDACTED)
    }

    /// `<base>/o/`, the listing endpoint
    pub(crate) fn list_url(&self) -> Result<Url> {
        let mut url = self.base.as_declassified().clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::InvalidLocation("PAR URL cannot be a base".to_string()))?
            .push("o")
            .push("");
        Ok(url)
    }

    /// `<base>/o/<full object name>`, each name segment percent-encoded
    pub(crate) fn object_url(&self, name: &str) -> Result<Url> {
        let mut url = self.base.as_declassified().clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                StorageError::InvalidLocation("PAR URL cannot be a base".to_string())
            })?;
            segments.push("o");
            for part in name.split('/') {
                segments.push(part);
            }
        }
        Ok(url)
    }
}

impl fmt::Display for ParUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/p/{}/n/{}/b/{}/o/{}",
            self.origin, REDACTED, self.namespace, self.bucket, self.prefix
        )
    }
}

/// Where a dump lives
#[derive(Debug, Clone)]
pub enum StorageLocation {
    Local(PathBuf),
    Par(ParUrl),
}

impl StorageLocation {
    /// Accepts plain paths, `file://` URLs and PAR URLs
    pub fn parse(text: &str) -> Result<Self> {
        if let Some(path) = text.strip_prefix("file://") {
            return Ok(StorageLocation::Local(PathBuf::from(path)));
        }
        if let Some(scheme) = url_scheme(text) {
            return match scheme {
                "http" | "https" => ParUrl::parse(text).map(StorageLocation::Par),
                other => Err(StorageError::InvalidLocation(format!(
                    "unsupported scheme '{other}'"
                ))),
            };
        }
        if text.is_empty() {
            return Err(StorageError::InvalidLocation(
                "empty storage location".to_string(),
            ));
        }
        Ok(StorageLocation::Local(PathBuf::from(text)))
    }

    pub fn is_par(&self) -> bool {
        matches!(self, StorageLocation::Par(_))
    }

    pub fn scope(&self) -> GrantScope {
        match self {
            StorageLocation::Par(par) => par.scope(),
            StorageLocation::Local(_) => GrantScope::Bucket,
        }
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self {
            StorageLocation::Local(path) => Some(path),
            StorageLocation::Par(_) => None,
        }
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageLocation::Local(path) => write!(f, "{}", path.display()),
            StorageLocation::Par(par) => write!(f, "{par}"),
        }
    }
}

/// True when `text` names something reachable only over a network
/// (`http://...`, `https://...`, `s3://...`), as opposed to a local path
pub fn looks_remote(text: &str) -> bool {
    matches!(url_scheme(text), Some(scheme) if scheme != "file")
}

fn url_scheme(text: &str) -> Option<&str> {
    let (scheme, _) = text.split_once("://")?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    let valid = first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(scheme)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUCKET_PAR: &str =
        "https://objectstorage.us-ashburn-1.oraclecloud.com/p/SeCrEtToKeN42/n/tenancy/b/dumps/o/";
    const PREFIX_PAR: &str =
        "https://objectstorage.us-ashburn-1.oraclecloud.com/p/SeCrEtToKeN42/n/tenancy/b/dumps/o/nightly/2024/";

    #[test]
    fn test_bucket_par() {
        let location = StorageLocation::parse(BUCKET_PAR).expect("parse");
        assert!(location.is_par());
        assert_eq!(location.scope(), GrantScope::Bucket);
        let StorageLocation::Par(par) = &location else {
            panic!("expected PAR");
        };
        assert_eq!(par.namespace(), "tenancy");
        assert_eq!(par.bucket(), "dumps");
    }

    #[test]
    fn test_prefix_par() {
        let location = StorageLocation::parse(PREFIX_PAR).expect("parse");
        assert!(location.is_par());
        assert_eq!(
            location.scope(),
            GrantScope::Prefix("nightly/2024/".to_string())
        );
    }

    #[test]
    fn test_display_redacts_token() {
        let location = StorageLocation::parse(PREFIX_PAR).expect("parse");
        let shown = location.to_string();
        assert!(!shown.contains("SeCrEtToKeN42"));
        assert!(shown.contains(REDACTED));
        assert!(shown.ends_with("/n/tenancy/b/dumps/o/nightly/2024/"));
        assert!(!format!("{location:?}").contains("SeCrEtToKeN42"));
    }

    #[test]
    fn test_object_urls() {
        let StorageLocation::Par(par) = StorageLocation::parse(PREFIX_PAR).expect("parse") else {
            panic!("expected PAR");
        };
        let url = par.object_url("nightly/2024/my schema@t.json").expect("url");
        assert_eq!(
            url.path(),
            "/p/SeCrEtToKeN42/n/tenancy/b/dumps/o/nightly/2024/my%20schema@t.json"
        );
        let list = par.list_url().expect("url");
        assert_eq!(par.scrub("bad token SeCrEtToKeN42"), "bad token [REDACTED]");
        assert_eq!(list.path(), "/p/SeCrEtToKeN42/n/tenancy/b/dumps/o/");
    }

    #[test]
    fn test_invalid_par_does_not_echo_input() {
        let err = ParUrl::parse("https://host/p/SeCrEtToKeN42/n/ns/b/bucket/o/file.json")
            .expect_err("object PAR");
        assert!(!err.to_string().contains("SeCrEtToKeN42"));

        let err = StorageLocation::parse("https://host/SeCrEtToKeN42/elsewhere").expect_err("not a PAR");
        assert!(!err.to_string().contains("SeCrEtToKeN42"));
    }

    #[test]
    fn test_local_locations() {
        let location = StorageLocation::parse("/var/dumps/x").expect("parse");
        assert_eq!(location.local_path(), Some(Path::new("/var/dumps/x")));
        let location = StorageLocation::parse("file:///var/dumps/x").expect("parse");
        assert_eq!(location.local_path(), Some(Path::new("/var/dumps/x")));
        assert!(StorageLocation::parse("s3://bucket/x").is_err());
        assert!(StorageLocation::parse("").is_err());
    }

    #[test]
    fn test_looks_remote() {
        assert!(looks_remote("http://whatever-file_starting-with-http"));
        assert!(looks_remote("https://host/p/x"));
        assert!(looks_remote("s3://bucket/progress.json"));
        assert!(!looks_remote("file:///tmp/progress.json"));
        assert!(!looks_remote("/tmp/progress.json"));
        assert!(!looks_remote("progress.json"));
        assert!(!looks_remote(""));
    }
}
