//! Time-bounded identifier crosswalks.
//!
//! Source records name entities through several identifier systems (filing keys,
//! market keys, analyst tickers). A [`Crosswalk`] maps each (namespace, key)
//! to a canonical [`EntityId`] through links that are valid over half-open
//! month windows.
//!
//! Crosswalks are reference data: they are bulk-loaded once through a
//! [`CrosswalkBuilder`] and never mutated afterwards.

use crate::{
    PanelError, Result,
    error::LinkWindow,
    period::Period,
    types::{EntityId, ExternalKey, Namespace},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Link from an external key to a canonical entity, valid over `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierLink {
    /// Namespace of the external key
    pub namespace: Namespace,
    /// External key
    pub key: ExternalKey,
    /// Entity the key resolves to while the link is valid
    pub entity: EntityId,
    /// First valid month
    pub start: Period,
    /// First month no longer valid; `None` for links that are still active
    #[serde(default)]
    pub end: Option<Period>,
    /// Whether the source flags this as the primary link
    #[serde(default)]
    pub primary: bool,
}

impl IdentifierLink {
    /// Create a link from month bounds.
    pub fn new(
        namespace: Namespace,
        key: impl Into<ExternalKey>,
        entity: EntityId,
        start: Period,
        end: Option<Period>,
        primary: bool,
    ) -> Self {
        Self {
            namespace,
            key: key.into(),
            entity,
            start,
            end,
            primary,
        }
    }

    /// Create a link from the inclusive date bounds used by linking tables.
    ///
    /// A link ending on any day of June 2005 is valid through June 2005.
    pub fn from_dates(
        namespace: Namespace,
        key: impl Into<ExternalKey>,
        entity: EntityId,
        start: NaiveDate,
        end_inclusive: Option<NaiveDate>,
        primary: bool,
    ) -> Self {
        Self::new(
            namespace,
            key,
            entity,
            Period::from_date(start),
            end_inclusive.map(|d| Period::from_date(d).succ()),
            primary,
        )
    }

    /// Whether the link is valid at `period`.
    pub fn contains(&self, period: Period) -> bool {
        self.start <= period && self.end.is_none_or(|end| period < end)
    }

    /// Whether two validity windows share at least one month.
    pub fn overlaps(&self, other: &Self) -> bool {
        let starts_before_other_ends = other.end.is_none_or(|end| self.start < end);
        let other_starts_before_end = self.end.is_none_or(|end| other.start < end);
        starts_before_other_ends && other_starts_before_end
    }

    const fn window(&self) -> LinkWindow {
        LinkWindow {
            start: self.start,
            end: self.end,
            entity: self.entity,
        }
    }
}

/// Bulk loader for a [`Crosswalk`].
#[derive(Debug, Default)]
pub struct CrosswalkBuilder {
    links: HashMap<Namespace, HashMap<ExternalKey, Vec<IdentifierLink>>>,
    count: usize,
}

impl CrosswalkBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one link.
    ///
    /// Overlapping windows for the same key are accepted unless both links are
    /// primary: ambiguous primaries are a data-quality problem in the reference
    /// tables and fail with [`PanelError::OverlapConflict`].
    pub fn register_link(&mut self, link: IdentifierLink) -> Result<()> {
        if link.end.is_some_and(|end| end <= link.start) {
            return Err(PanelError::InvalidPeriod(format!(
                "empty validity window {} for {} key '{}'",
                link.window(),
                link.namespace,
                link.key
            )));
        }

        let existing = self
            .links
            .entry(link.namespace.clone())
            .or_default()
            .entry(link.key.clone())
            .or_default();

        if link.primary {
            if let Some(clash) = existing.iter().find(|l| l.primary && l.overlaps(&link)) {
                tracing::error!(
                    namespace = %link.namespace,
                    key = %link.key,
                    existing = %clash.window(),
                    incoming = %link.window(),
                    "overlapping primary identifier links"
                );
                return Err(PanelError::OverlapConflict {
                    namespace: link.namespace.clone(),
                    key: link.key.to_string(),
                    existing: clash.window(),
                    incoming: link.window(),
                });
            }
        }

        existing.push(link);
        self.count += 1;
        Ok(())
    }

    /// Register every link, stopping at the first conflict.
    pub fn extend<I: IntoIterator<Item = IdentifierLink>>(&mut self, links: I) -> Result<()> {
        links.into_iter().try_for_each(|link| self.register_link(link))
    }

    /// Freeze the loaded links.
    pub fn build(mut self) -> Crosswalk {
        for by_key in self.links.values_mut() {
            for candidates in by_key.values_mut() {
                // Resolution scans in this order and takes the first valid link.
                candidates.sort_by(|a, b| {
                    b.primary
                        .cmp(&a.primary)
                        .then(b.start.cmp(&a.start))
                        .then(a.entity.cmp(&b.entity))
                        .then(a.end.cmp(&b.end))
                });
            }
        }
        tracing::debug!(links = self.count, "crosswalk loaded");
        Crosswalk {
            links: self.links,
            count: self.count,
        }
    }
}

/// Immutable, time-bounded identifier mapping.
#[derive(Debug, Clone, Default)]
pub struct Crosswalk {
    links: HashMap<Namespace, HashMap<ExternalKey, Vec<IdentifierLink>>>,
    count: usize,
}

impl Crosswalk {
    /// Bulk-load a crosswalk from link records.
    pub fn from_links<I: IntoIterator<Item = IdentifierLink>>(links: I) -> Result<Self> {
        let mut builder = CrosswalkBuilder::new();
        builder.extend(links)?;
        Ok(builder.build())
    }

    /// Resolve `key` in `namespace` at `as_of`.
    ///
    /// When several links are valid at once, primary links win over
    /// non-primary ones, then the latest start, then the lowest entity id.
    pub fn resolve(&self, namespace: &Namespace, key: &str, as_of: Period) -> Option<EntityId> {
        self.links
            .get(namespace)?
            .get(key)?
            .iter()
            .find(|link| link.contains(as_of))
            .map(|link| link.entity)
    }

    /// All links registered for a key, in resolution order.
    pub fn links_for(&self, namespace: &Namespace, key: &str) -> &[IdentifierLink] {
        self.links
            .get(namespace)
            .and_then(|by_key| by_key.get(key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total number of links.
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Whether no link is loaded.
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Counts of resolution outcomes, surfaced for data-quality auditing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    /// Lookups that found a valid link
    pub resolved: usize,
    /// Lookups with no valid link at the requested month
    pub unresolved: usize,
}

/// Crosswalk lookups with running resolution counts.
#[derive(Debug)]
pub struct Resolver<'a> {
    crosswalk: &'a Crosswalk,
    stats: ResolveStats,
}

impl<'a> Resolver<'a> {
    /// Start counting lookups against `crosswalk`.
    pub const fn new(crosswalk: &'a Crosswalk) -> Self {
        Self {
            crosswalk,
            stats: ResolveStats {
                resolved: 0,
                unresolved: 0,
            },
        }
    }

    /// Resolve and record the outcome.
    pub fn resolve(&mut self, namespace: &Namespace, key: &str, as_of: Period) -> Option<EntityId> {
        let entity = self.crosswalk.resolve(namespace, key, as_of);
        if entity.is_some() {
            self.stats.resolved += 1;
        } else {
            self.stats.unresolved += 1;
        }
        entity
    }

    /// Counts so far.
    pub const fn stats(&self) -> ResolveStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

    fn ym(year: i32, month: u8) -> Period {
        Period::from_year_month(year, month).unwrap()
    }

    fn link(key: &str, entity: u64, start: Period, end: Option<Period>, primary: bool) -> IdentifierLink {
        IdentifierLink::new(Namespace::Filing, key, EntityId(entity), start, end, primary)
    }

    #[test]
    fn test_resolve_half_open_window() {
        let cw = Crosswalk::from_links([link("001690", 14593, ym(1990, 1), Some(ym(2000, 1)), true)])
            .unwrap();
        assert_eq!(cw.resolve(&Namespace::Filing, "001690", ym(1990, 1)), Some(EntityId(14593)));
        assert_eq!(cw.resolve(&Namespace::Filing, "001690", ym(1999, 12)), Some(EntityId(14593)));
        assert_eq!(cw.resolve(&Namespace::Filing, "001690", ym(2000, 1)), None);
        assert_eq!(cw.resolve(&Namespace::Filing, "001690", ym(1989, 12)), None);
        assert_eq!(cw.resolve(&Namespace::Market, "001690", ym(1995, 1)), None);
    }

    #[test]
    fn test_open_ended_link() {
        let cw = Crosswalk::from_links([link("IBM", 12490, ym(1980, 1), None, false)]).unwrap();
        assert_eq!(cw.resolve(&Namespace::Filing, "IBM", ym(2030, 6)), Some(EntityId(12490)));
    }

    #[test]
    fn test_from_dates_inclusive_end() {
        let l = IdentifierLink::from_dates(
            Namespace::Filing,
            "006066",
            EntityId(12490),
            NaiveDate::from_ymd_opt(1962, 1, 31).unwrap(),
            NaiveDate::from_ymd_opt(2005, 6, 30),
            true,
        );
        assert!(l.contains(ym(2005, 6)));
        assert!(!l.contains(ym(2005, 7)));
        assert!(l.contains(ym(1962, 1)));
    }

    #[test]
    fn test_overlapping_primaries_fail() {
        let err = Crosswalk::from_links([
            link("001690", 14593, ym(1990, 1), Some(ym(2000, 1)), true),
            link("001690", 10107, ym(1999, 6), None, true),
        ])
        .unwrap_err();
        match err {
            PanelError::OverlapConflict { key, existing, incoming, .. } => {
                assert_eq!(key, "001690");
                assert_eq!(existing.entity, EntityId(14593));
                assert_eq!(incoming.entity, EntityId(10107));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_adjacent_primaries_are_fine() {
        let cw = Crosswalk::from_links([
            link("001690", 14593, ym(1990, 1), Some(ym(2000, 1)), true),
            link("001690", 10107, ym(2000, 1), None, true),
        ])
        .unwrap();
        assert_eq!(cw.resolve(&Namespace::Filing, "001690", ym(1999, 12)), Some(EntityId(14593)));
        assert_eq!(cw.resolve(&Namespace::Filing, "001690", ym(2000, 1)), Some(EntityId(10107)));
    }

    #[test]
    fn test_overlap_tie_break() {
        let cw = Crosswalk::from_links([
            // non-primary with the latest start loses to any primary
            link("K", 3, ym(2005, 1), None, false),
            link("K", 2, ym(2000, 1), None, true),
            // among non-primaries the latest start wins, then the lowest entity
            link("J", 9, ym(2000, 1), None, false),
            link("J", 7, ym(2003, 1), None, false),
            link("J", 5, ym(2003, 1), None, false),
        ])
        .unwrap();
        assert_eq!(cw.resolve(&Namespace::Filing, "K", ym(2006, 1)), Some(EntityId(2)));
        assert_eq!(cw.resolve(&Namespace::Filing, "J", ym(2002, 1)), Some(EntityId(9)));
        assert_eq!(cw.resolve(&Namespace::Filing, "J", ym(2004, 1)), Some(EntityId(5)));
    }

    #[test]
    fn test_resolution_independent_of_load_order() {
        let links = vec![
            link("K", 4, ym(2000, 1), None, false),
            link("K", 3, ym(2001, 1), Some(ym(2010, 1)), false),
            link("K", 8, ym(2001, 1), Some(ym(2004, 1)), false),
            link("K", 2, ym(2006, 1), Some(ym(2008, 1)), true),
            link("K", 1, ym(1995, 1), Some(ym(2001, 1)), true),
        ];
        let reference = Crosswalk::from_links(links.clone()).unwrap();
        let months: Vec<_> = Period::range(ym(1994, 1), ym(2012, 12)).collect();
        let expected: Vec<_> = months
            .iter()
            .map(|m| reference.resolve(&Namespace::Filing, "K", *m))
            .collect();

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let mut shuffled = links.clone();
            shuffled.shuffle(&mut rng);
            let cw = Crosswalk::from_links(shuffled).unwrap();
            let got: Vec<_> = months
                .iter()
                .map(|m| cw.resolve(&Namespace::Filing, "K", *m))
                .collect();
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn test_empty_window_rejected() {
        let err = Crosswalk::from_links([link("K", 1, ym(2000, 1), Some(ym(2000, 1)), false)]);
        assert!(matches!(err, Err(PanelError::InvalidPeriod(_))));
    }

    #[test]
    fn test_resolver_counts() {
        let cw = Crosswalk::from_links([link("K", 1, ym(2000, 1), None, true)]).unwrap();
        let mut resolver = Resolver::new(&cw);
        assert!(resolver.resolve(&Namespace::Filing, "K", ym(2001, 1)).is_some());
        assert!(resolver.resolve(&Namespace::Filing, "K", ym(1999, 1)).is_none());
        assert!(resolver.resolve(&Namespace::Filing, "Q", ym(2001, 1)).is_none());
        assert_eq!(resolver.stats(), ResolveStats { resolved: 1, unresolved: 2 });
        assert_eq!(cw.links_for(&Namespace::Filing, "K").len(), 1);
        assert!(cw.links_for(&Namespace::Analyst, "K").is_empty());
    }

    #[test]
    fn test_links_deserialize_from_json() {
        let json = r#"[
            {"namespace": "analyst", "key": "IBM", "entity": 12490, "start": "1976-01", "primary": true},
            {"namespace": {"other": "secid"}, "key": "5095", "entity": 12490, "start": "1996-01", "end": "2020-01"}
        ]"#;
        let links: Vec<IdentifierLink> = serde_json::from_str(json).unwrap();
        let cw = Crosswalk::from_links(links).unwrap();
        assert_eq!(cw.len(), 2);
        assert_eq!(cw.resolve(&Namespace::Analyst, "IBM", ym(2000, 1)), Some(EntityId(12490)));
        let secid = Namespace::Other("secid".into());
        assert_eq!(cw.resolve(&secid, "5095", ym(2019, 12)), Some(EntityId(12490)));
        assert_eq!(cw.resolve(&secid, "5095", ym(2020, 1)), None);
    }
}
