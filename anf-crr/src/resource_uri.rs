//! Resource id parsing and construction.
//!
//! Resource ids follow the resource manager grammar:
//!
//! ```text
//! /subscriptions/{sub}/resourceGroups/{rg}/providers/{provider}/netAppAccounts/{account}
//!     /capacityPools/{pool}/volumes/{volume}/snapshots/{snapshot}
//! ```
//!
//! A path is split into (keyword, value) pairs once and every lookup goes
//! through that pair list. A resource group literally named `snapshots` is
//! the value of the `resourceGroups` pair and can never be mistaken for the
//! `snapshots` keyword further down the path.
//!
//! Nothing in here fails: malformed or truncated input yields `None` (or an
//! empty string for [`build_path`]), so the helpers are safe to call on
//! partially known ids.

use std::fmt;

/// Resource provider namespace of Azure NetApp Files.
pub const NETAPP_PROVIDER: &str = "Microsoft.NetApp";

pub const SUBSCRIPTIONS: &str = "subscriptions";
pub const RESOURCE_GROUPS: &str = "resourceGroups";
pub const PROVIDERS: &str = "providers";
pub const NETAPP_ACCOUNTS: &str = "netAppAccounts";
pub const CAPACITY_POOLS: &str = "capacityPools";
pub const VOLUMES: &str = "volumes";
pub const SNAPSHOTS: &str = "snapshots";

/// One (keyword, value) pair of a resource path.
#[derive(Debug, Clone, Copy)]
struct Segment<'a> {
    keyword: &'a str,
    /// Byte offset of the keyword in the path it was split from.
    offset: usize,
    value: Option<&'a str>,
}

impl Segment<'_> {
    fn is(&self, keyword: &str) -> bool {
        self.keyword.eq_ignore_ascii_case(keyword)
    }
}

const KEYWORDS: [&str; 7] = [
    SUBSCRIPTIONS,
    RESOURCE_GROUPS,
    PROVIDERS,
    NETAPP_ACCOUNTS,
    CAPACITY_POOLS,
    VOLUMES,
    SNAPSHOTS,
];

/// Split an already trimmed path into keyword/value pairs.
///
/// Pairs are anchored on keywords: the known resource manager keywords plus
/// `extra`, if given. Each keyword takes the element after it as its value,
/// even when that element is itself a keyword. Elements that are neither a
/// keyword nor a keyword's value are skipped, so fragments and host-prefixed
/// paths tokenize the same way full ids do.
///
/// Empty elements (leading slash, doubled or trailing slashes) are skipped.
/// A trailing keyword without a value yields a pair with `value: None`.
fn segments<'a>(path: &'a str, extra: Option<&str>) -> Vec<Segment<'a>> {
    let mut tokens = Vec::new();
    let mut offset = 0;
    for token in path.split('/') {
        if !token.is_empty() {
            tokens.push((offset, token));
        }
        offset += token.len() + 1;
    }

    let is_keyword = |token: &str| {
        KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(token))
            || extra.is_some_and(|k| k.eq_ignore_ascii_case(token))
    };

    let mut segments = Vec::new();
    let mut rest = tokens.as_slice();
    while let [(offset, token), tail @ ..] = rest {
        let (offset, token) = (*offset, *token);
        if !is_keyword(token) {
            rest = tail;
            continue;
        }
        segments.push(Segment {
            keyword: token,
            offset,
            value: tail.first().map(|&(_, value)| value),
        });
        rest = tail.get(1..).unwrap_or_default();
    }
    segments
}

fn find<'a>(segments: &[Segment<'a>], keyword: &str) -> Option<Segment<'a>> {
    segments.iter().find(|s| s.is(keyword)).copied()
}

/// Get the value that follows `segment_name` in `path`.
///
/// The keyword is matched case-insensitively and may be given with or
/// without a leading slash.
pub fn extract_segment(path: &str, segment_name: &str) -> Option<String> {
    let path = path.trim();
    let keyword = segment_name.trim().trim_start_matches('/');
    if path.is_empty() || keyword.is_empty() {
        return None;
    }

    find(&segments(path, Some(keyword)), keyword)
        .and_then(|s| s.value)
        .map(str::to_string)
}

pub fn extract_subscription_id(path: &str) -> Option<String> {
    extract_segment(path, SUBSCRIPTIONS)
}

pub fn extract_resource_group(path: &str) -> Option<String> {
    extract_segment(path, RESOURCE_GROUPS)
}

pub fn extract_account(path: &str) -> Option<String> {
    extract_segment(path, NETAPP_ACCOUNTS)
}

pub fn extract_pool(path: &str) -> Option<String> {
    extract_segment(path, CAPACITY_POOLS)
}

pub fn extract_volume(path: &str) -> Option<String> {
    extract_segment(path, VOLUMES)
}

pub fn extract_snapshot(path: &str) -> Option<String> {
    extract_segment(path, SNAPSHOTS)
}

/// Get the id of the volume a snapshot belongs to, i.e. the path cut right
/// before its `/snapshots` segment.
pub fn extract_volume_root(path: &str) -> Option<String> {
    let path = path.trim();
    let snapshots = find(&segments(path, None), SNAPSHOTS)?;
    let root = path[..snapshots.offset].trim_end_matches('/');
    if root.is_empty() {
        None
    } else {
        Some(root.to_string())
    }
}

/// Get the last element of a path, whatever its keyword.
pub fn last_segment_name(path: &str) -> Option<String> {
    path.trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Whether `path` names a NetApp snapshot.
pub fn is_snapshot_path(path: &str) -> bool {
    let segments = segments(path.trim(), None);

    let is_netapp = segments.windows(2).any(|pair| {
        pair[0].is(PROVIDERS)
            && pair[0]
                .value
                .is_some_and(|p| p.eq_ignore_ascii_case(NETAPP_PROVIDER))
            && pair[1].is(NETAPP_ACCOUNTS)
    });

    is_netapp && segments.iter().any(|s| s.is(SNAPSHOTS))
}

/// Compose `/subscriptions/{sub}/resourceGroups/{rg}/providers/{provider}/{leaf}`.
///
/// Returns an empty string if any part is blank.
pub fn build_path(subscription_id: &str, resource_group: &str, provider: &str, leaf: &str) -> String {
    if [subscription_id, resource_group, provider, leaf]
        .iter()
        .any(|part| part.trim().is_empty())
    {
        return String::new();
    }

    format!(
        "/{SUBSCRIPTIONS}/{subscription_id}/{RESOURCE_GROUPS}/{resource_group}/{PROVIDERS}/{provider}/{}",
        leaf.trim_start_matches('/')
    )
}

/// Level of the NetApp resource hierarchy a lookup targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Account,
    Pool,
    Volume,
    Snapshot,
    /// Replication status of a volume.
    Replication,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Account => "account",
            ResourceKind::Pool => "capacity pool",
            ResourceKind::Volume => "volume",
            ResourceKind::Snapshot => "snapshot",
            ResourceKind::Replication => "volume replication",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decomposed NetApp resource id.
///
/// NetApp levels are hierarchical: a pool is only recorded when the account
/// is, a volume only when the pool is, and so on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResourceIdentifier {
    subscription_id: Option<String>,
    resource_group: Option<String>,
    provider: Option<String>,
    account_name: Option<String>,
    pool_name: Option<String>,
    volume_name: Option<String>,
    snapshot_name: Option<String>,
}

impl ResourceIdentifier {
    pub fn parse(path: &str) -> Self {
        let segments = segments(path.trim(), None);
        let lookup = |keyword: &str| {
            find(&segments, keyword)
                .and_then(|s| s.value)
                .map(str::to_string)
        };

        let account_name = lookup(NETAPP_ACCOUNTS);
        let pool_name = account_name.as_ref().and(lookup(CAPACITY_POOLS));
        let volume_name = pool_name.as_ref().and(lookup(VOLUMES));
        let snapshot_name = volume_name.as_ref().and(lookup(SNAPSHOTS));

        Self {
            subscription_id: lookup(SUBSCRIPTIONS),
            resource_group: lookup(RESOURCE_GROUPS),
            provider: lookup(PROVIDERS),
            account_name,
            pool_name,
            volume_name,
            snapshot_name,
        }
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription_id.as_deref()
    }

    pub fn resource_group(&self) -> Option<&str> {
        self.resource_group.as_deref()
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn account_name(&self) -> Option<&str> {
        self.account_name.as_deref()
    }

    pub fn pool_name(&self) -> Option<&str> {
        self.pool_name.as_deref()
    }

    pub fn volume_name(&self) -> Option<&str> {
        self.volume_name.as_deref()
    }

    pub fn snapshot_name(&self) -> Option<&str> {
        self.snapshot_name.as_deref()
    }

    /// Deepest NetApp level present, if any.
    pub fn kind(&self) -> Option<ResourceKind> {
        if self.snapshot_name.is_some() {
            Some(ResourceKind::Snapshot)
        } else if self.volume_name.is_some() {
            Some(ResourceKind::Volume)
        } else if self.pool_name.is_some() {
            Some(ResourceKind::Pool)
        } else if self.account_name.is_some() {
            Some(ResourceKind::Account)
        } else {
            None
        }
    }

    /// Canonical path for the fields present, or an empty string when the
    /// subscription, resource group, provider or account is missing.
    pub fn to_path(&self) -> String {
        let levels = [
            (NETAPP_ACCOUNTS, &self.account_name),
            (CAPACITY_POOLS, &self.pool_name),
            (VOLUMES, &self.volume_name),
            (SNAPSHOTS, &self.snapshot_name),
        ];
        let leaf = levels
            .iter()
            .map_while(|&(keyword, value)| value.as_ref().map(|v| format!("{keyword}/{v}")))
            .collect::<Vec<_>>()
            .join("/");

        build_path(
            self.subscription_id.as_deref().unwrap_or_default(),
            self.resource_group.as_deref().unwrap_or_default(),
            self.provider.as_deref().unwrap_or_default(),
            &leaf,
        )
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_path())
    }
}
