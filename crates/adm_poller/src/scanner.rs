//! Remote directory scanning.
//!
//! No single listing command is complete on every server: some hide the
//! newest file from MLSD for a while, some do not implement MLSD at all.
//! The scanner runs three listing strategies and unions their results by
//! file name. The first strategy to report a field wins; later ones only
//! fill gaps. A strategy failing is fine as long as one succeeds.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{ScanError, TransportError};
use crate::naming::{base_name, is_log_file, parse_modify_fact, timestamp_from_name};
use crate::transport::RemoteSession;

/// One remote log file seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub size: Option<u64>,
    /// Protocol-reported modification time, else the filename stamp.
    pub modified: Option<DateTime<Utc>>,
}

impl Candidate {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            modified: None,
        }
    }

    /// Time used for ordering: protocol metadata first, then the name.
    pub fn effective_time(&self) -> Option<DateTime<Utc>> {
        self.modified.or_else(|| timestamp_from_name(&self.name))
    }

    fn fill_from(&mut self, other: Candidate) {
        if self.size.is_none() {
            self.size = other.size;
        }
        if self.modified.is_none() {
            self.modified = other.modified;
        }
    }
}

/// One way of listing the current remote directory.
pub trait ListingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Entries ending in the log extension. Fields the mechanism cannot
    /// provide are left empty.
    fn list(&self, session: &mut dyn RemoteSession) -> Result<Vec<Candidate>, TransportError>;
}

/// MLSD: name, size and modify facts in one round trip.
#[derive(Debug, Default, Clone, Copy)]
pub struct MachineListing;

impl ListingStrategy for MachineListing {
    fn name(&self) -> &'static str {
        "MLSD"
    }

    fn list(&self, session: &mut dyn RemoteSession) -> Result<Vec<Candidate>, TransportError> {
        Ok(session
            .list_facts()?
            .iter()
            .filter_map(|line| parse_mlsd_line(line))
            .collect())
    }
}

/// Parses `type=file;size=12;modify=20240101000000; name`.
pub fn parse_mlsd_line(line: &str) -> Option<Candidate> {
    let (facts_part, name) = line.split_once(' ')?;
    let name = base_name(name.trim());
    if !is_log_file(name) {
        return None;
    }

    let facts: HashMap<String, &str> = facts_part
        .split(';')
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim()))
        .collect();

    if !facts.get("type").is_some_and(|t| t.eq_ignore_ascii_case("file")) {
        return None;
    }

    Some(Candidate {
        name: name.to_string(),
        size: facts.get("size").and_then(|s| s.parse::<u64>().ok()),
        modified: facts.get("modify").and_then(|m| parse_modify_fact(m)),
    })
}

/// NLST: names only.
#[derive(Debug, Default, Clone, Copy)]
pub struct NameListing;

impl ListingStrategy for NameListing {
    fn name(&self) -> &'static str {
        "NLST"
    }

    fn list(&self, session: &mut dyn RemoteSession) -> Result<Vec<Candidate>, TransportError> {
        Ok(session
            .list_names()?
            .iter()
            .map(|entry| base_name(entry.trim()))
            .filter(|name| is_log_file(name))
            .map(Candidate::named)
            .collect())
    }
}

/// LIST: the file name is taken to be the last whitespace-separated token.
#[derive(Debug, Default, Clone, Copy)]
pub struct LongListing;

impl ListingStrategy for LongListing {
    fn name(&self) -> &'static str {
        "LIST"
    }

    fn list(&self, session: &mut dyn RemoteSession) -> Result<Vec<Candidate>, TransportError> {
        Ok(session
            .list_long()?
            .iter()
            .filter_map(|line| parse_list_line(line))
            .map(Candidate::named)
            .collect())
    }
}

/// Tail-token name of a LIST line, if it is a log file.
pub fn parse_list_line(line: &str) -> Option<&str> {
    let name = line.split_whitespace().last()?;
    if name == "." || name == ".." || !is_log_file(name) {
        return None;
    }
    Some(name)
}

/// Result of one directory scan.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Union of all strategies, sorted by name.
    pub candidates: Vec<Candidate>,
    /// Strategies that failed this scan, with the reason.
    pub failures: Vec<(&'static str, String)>,
}

/// Unions several [`ListingStrategy`]s into one candidate set.
pub struct Scanner {
    strategies: Vec<Box<dyn ListingStrategy>>,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.strategies.iter().map(|s| s.name()).collect();
        f.debug_struct("Scanner").field("strategies", &names).finish()
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::with_strategies(vec![
            Box::new(MachineListing),
            Box::new(NameListing),
            Box::new(LongListing),
        ])
    }
}

impl Scanner {
    /// Strategies run in the given order; earlier ones win metadata ties.
    pub fn with_strategies(strategies: Vec<Box<dyn ListingStrategy>>) -> Self {
        Self { strategies }
    }

    /// Lists the session's current directory.
    ///
    /// Missing modification times are taken from the file name; missing
    /// sizes are probed with SIZE, best-effort.
    pub fn scan(&self, session: &mut dyn RemoteSession) -> Result<ScanReport, ScanError> {
        let mut merged: BTreeMap<String, Candidate> = BTreeMap::new();
        let mut failures = Vec::new();

        for strategy in &self.strategies {
            match strategy.list(session) {
                Ok(entries) => {
                    debug!("{} listed {} log file(s)", strategy.name(), entries.len());
                    for entry in entries {
                        match merged.get_mut(&entry.name) {
                            Some(existing) => existing.fill_from(entry),
                            None => {
                                merged.insert(entry.name.clone(), entry);
                            }
                        }
                    }
                }
                Err(e) => {
                    debug!("{} listing failed: {}", strategy.name(), e);
                    failures.push((strategy.name(), e.to_string()));
                }
            }
        }

        if !self.strategies.is_empty() && failures.len() == self.strategies.len() {
            let reasons: Vec<String> = failures
                .iter()
                .map(|(name, reason)| format!("{}: {}", name, reason))
                .collect();
            return Err(ScanError::AllStrategiesFailed(reasons.join("; ")));
        }

        let mut candidates: Vec<Candidate> = merged.into_values().collect();
        for candidate in &mut candidates {
            if candidate.modified.is_none() {
                candidate.modified = timestamp_from_name(&candidate.name);
            }
            if candidate.size.is_none() {
                candidate.size = session.size(&candidate.name).ok();
            }
        }

        Ok(ScanReport { candidates, failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Session that only answers listings and SIZE.
    #[derive(Default)]
    struct ListingOnly {
        facts: Option<Vec<String>>,
        names: Option<Vec<String>>,
        long: Option<Vec<String>>,
        sizes: HashMap<String, u64>,
    }

    fn refused() -> TransportError {
        TransportError::Refused {
            code: 500,
            message: "command not understood".to_string(),
        }
    }

    impl RemoteSession for ListingOnly {
        fn change_dir(&mut self, _dir: &str) -> Result<(), TransportError> {
            Ok(())
        }
        fn list_facts(&mut self) -> Result<Vec<String>, TransportError> {
            self.facts.clone().ok_or_else(refused)
        }
        fn list_names(&mut self) -> Result<Vec<String>, TransportError> {
            self.names.clone().ok_or_else(refused)
        }
        fn list_long(&mut self) -> Result<Vec<String>, TransportError> {
            self.long.clone().ok_or_else(refused)
        }
        fn size(&mut self, name: &str) -> Result<u64, TransportError> {
            self.sizes.get(name).copied().ok_or_else(refused)
        }
        fn modified(&mut self, _name: &str) -> Result<DateTime<Utc>, TransportError> {
            Err(refused())
        }
        fn set_binary(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn restart_at(&mut self, _offset: u64) -> Result<(), TransportError> {
            Ok(())
        }
        fn retrieve(&mut self, _name: &str) -> Result<Vec<u8>, TransportError> {
            Err(refused())
        }
        fn quit(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    const OLD: &str = "DayZServer_X1_x64_2024-01-01_00-00-00.ADM";
    const NEW: &str = "DayZServer_X1_x64_2024-01-01_01-00-00.ADM";

    #[test]
    fn test_parse_mlsd_line() {
        let c = parse_mlsd_line(&format!("type=file;size=500;modify=20240101003000; {}", OLD)).expect("entry");
        assert_eq!(c.name, OLD);
        assert_eq!(c.size, Some(500));
        assert_eq!(c.modified, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap()));

        assert!(parse_mlsd_line("type=dir;modify=20240101003000; logs.adm").is_none());
        assert!(parse_mlsd_line("type=file;size=1; server.RPT").is_none());
        assert!(parse_mlsd_line("garbage").is_none());
    }

    #[test]
    fn test_parse_list_line() {
        assert_eq!(
            parse_list_line(&format!("-rw-r--r-- 1 ftp ftp 500 Jan 01 00:00 {}", OLD)),
            Some(OLD)
        );
        assert_eq!(parse_list_line("drwxr-xr-x 2 ftp ftp 4096 Jan 01 00:00 .."), None);
        assert_eq!(parse_list_line("-rw-r--r-- 1 ftp ftp 10 Jan 01 00:00 notes.txt"), None);
        assert_eq!(parse_list_line("   "), None);
    }

    #[test]
    fn test_union_of_all_strategies() {
        let mut session = ListingOnly {
            facts: Some(vec![format!("type=file;size=500;modify=20240101003000; {}", OLD)]),
            names: Some(vec![OLD.to_string(), "DayZServer_X1_x64.RPT".to_string()]),
            long: Some(vec![format!("-rw-r--r-- 1 ftp ftp 120 Jan 01 01:00 {}", NEW)]),
            sizes: HashMap::from([(NEW.to_string(), 120)]),
        };

        let report = Scanner::default().scan(&mut session).expect("scan");
        assert!(report.failures.is_empty());
        assert_eq!(report.candidates.len(), 2);

        let old = &report.candidates[0];
        assert_eq!(old.name, OLD);
        assert_eq!(old.size, Some(500));
        // MLSD's modify fact wins over the name stamp.
        assert_eq!(old.modified, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap()));

        let new = &report.candidates[1];
        assert_eq!(new.name, NEW);
        assert_eq!(new.size, Some(120));
        assert_eq!(new.modified, Some(Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap()));
    }

    #[test]
    fn test_partial_failure_is_tolerated() {
        let mut session = ListingOnly {
            names: Some(vec![format!("/logs/{}", OLD)]),
            ..Default::default()
        };

        let report = Scanner::default().scan(&mut session).expect("scan");
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.candidates.len(), 1);
        assert_eq!(report.candidates[0].name, OLD);
        assert_eq!(report.candidates[0].size, None);
    }

    #[test]
    fn test_total_failure_is_an_error() {
        let mut session = ListingOnly::default();
        assert!(matches!(
            Scanner::default().scan(&mut session),
            Err(ScanError::AllStrategiesFailed(_))
        ));
    }

    #[test]
    fn test_unstamped_names_keep_null_time() {
        let mut session = ListingOnly {
            names: Some(vec!["current.adm".to_string()]),
            facts: Some(vec![]),
            long: Some(vec![]),
            ..Default::default()
        };

        let report = Scanner::default().scan(&mut session).expect("scan");
        assert_eq!(report.candidates, vec![Candidate::named("current.adm")]);
    }
}
