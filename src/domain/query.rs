use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Criteria filter types, as integers in the upstream wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FilterType {
    Tag = 1,
    ExtensionId = 4,
    Category = 5,
    ExtensionName = 7,
    Target = 8,
    Featured = 9,
    SearchText = 10,
    ExcludeWithFlags = 12,
}

/// Sort keys, as integers in the upstream wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SortBy {
    None = 0,
    Name = 2,
    InstallCount = 4,
    PublishedDate = 5,
    Rating = 12,
}

impl SortBy {
    pub fn from_i32(v: i32) -> Self {
        match v {
            2 => SortBy::Name,
            4 => SortBy::InstallCount,
            5 => SortBy::PublishedDate,
            12 => SortBy::Rating,
            _ => SortBy::None,
        }
    }
}

bitflags! {
    /// Query-level flags controlling what the response includes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QueryFlags: u32 {
        const NONE = 0x0;
        const INCLUDE_VERSIONS = 0x1;
        const INCLUDE_FILES = 0x2;
        const INCLUDE_CATEGORY_AND_TAGS = 0x4;
        const INCLUDE_SHARED_ACCOUNTS = 0x8;
        const INCLUDE_VERSION_PROPERTIES = 0x10;
        const EXCLUDE_NON_VALIDATED = 0x20;
        const INCLUDE_INSTALLATION_TARGETS = 0x40;
        const INCLUDE_ASSET_URI = 0x80;
        const INCLUDE_STATISTICS = 0x100;
        const INCLUDE_LATEST_VERSION_ONLY = 0x200;
        const UNPUBLISHED = 0x1000;
        const INCLUDE_NAME_CONFLICT_INFO = 0x8000;

        /// AllVersions = 51 (0x1|0x2|0x10|0x20) per the upstream protocol.
        const ALL_VERSIONS = 0x33;
        /// LatestVersion = 950 (0x1|0x2|0x10|0x20|0x80|0x100|0x200) per the
        /// upstream protocol.
        const LATEST_VERSION = 0x3B3;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criterion {
    #[serde(rename = "filterType")]
    pub filter_type: i32,
    pub value: String,
}

impl Criterion {
    pub fn new(filter_type: FilterType, value: impl Into<String>) -> Self {
        Self {
            filter_type: filter_type as i32,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryFilter {
    pub criteria: Vec<Criterion>,
    #[serde(rename = "pageNumber", default = "default_page_number")]
    pub page_number: i64,
    #[serde(rename = "pageSize", default = "default_page_size")]
    pub page_size: i64,
    #[serde(rename = "sortBy", default)]
    pub sort_by: i32,
    #[serde(rename = "sortOrder", default)]
    pub sort_order: i32,
}

fn default_page_number() -> i64 {
    1
}
fn default_page_size() -> i64 {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub filters: Vec<QueryFilter>,
    #[serde(rename = "assetTypes", default)]
    pub asset_types: Vec<String>,
    #[serde(default)]
    pub flags: u32,
}

const TARGET_CRITERION_VALUE: &str = "Microsoft.VisualStudio.Code";

impl Query {
    /// Builds a query with the standard Target criterion prepended and the
    /// ExcludeWithFlags criterion appended, as every real query does.
    pub fn with_criteria(mut criteria: Vec<Criterion>, page_number: i64, page_size: i64, sort_by: SortBy, flags: QueryFlags) -> Self {
        let mut full = vec![Criterion::new(FilterType::Target, TARGET_CRITERION_VALUE)];
        full.append(&mut criteria);
        full.push(Criterion::new(FilterType::ExcludeWithFlags, "4096"));
        Self {
            filters: vec![QueryFilter {
                criteria: full,
                page_number,
                page_size,
                sort_by: sort_by as i32,
                sort_order: 0,
            }],
            asset_types: vec![],
            flags: flags.bits(),
        }
    }

    pub fn latest_by_unique_id(uid: &str) -> Self {
        Self::with_criteria(
            vec![Criterion::new(FilterType::ExtensionName, uid)],
            1,
            1,
            SortBy::None,
            QueryFlags::LATEST_VERSION,
        )
    }

    /// Used by the acquisition pipeline instead of `latest_by_unique_id`:
    /// the pipeline's own per-version pre-release/platform filtering needs
    /// the full version list, which `LatestVersion` would truncate to one.
    pub fn all_versions_by_unique_id(uid: &str) -> Self {
        Self::with_criteria(
            vec![Criterion::new(FilterType::ExtensionName, uid)],
            1,
            1,
            SortBy::None,
            QueryFlags::ALL_VERSIONS,
        )
    }

    pub fn all_versions_by_uuid(uuid: &str) -> Self {
        Self::with_criteria(
            vec![Criterion::new(FilterType::ExtensionId, uuid)],
            1,
            1,
            SortBy::None,
            QueryFlags::ALL_VERSIONS,
        )
    }

    pub fn latest_by_text(text: &str, limit: i64, sort_by: SortBy) -> Self {
        Self::with_criteria(
            vec![Criterion::new(FilterType::SearchText, text)],
            1,
            limit,
            sort_by,
            QueryFlags::LATEST_VERSION,
        )
    }

    pub fn flags(&self) -> QueryFlags {
        QueryFlags::from_bits_truncate(self.flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_by_unique_id_wraps_target_and_exclude_criteria() {
        let q = Query::latest_by_unique_id("golang.Go");
        let criteria = &q.filters[0].criteria;
        assert_eq!(criteria.first().unwrap().filter_type, FilterType::Target as i32);
        assert_eq!(criteria.last().unwrap().filter_type, FilterType::ExcludeWithFlags as i32);
        assert_eq!(criteria.last().unwrap().value, "4096");
        assert!(q.flags().contains(QueryFlags::INCLUDE_LATEST_VERSION_ONLY));
    }

    #[test]
    fn all_versions_by_unique_id_sets_all_versions_flag() {
        let q = Query::all_versions_by_unique_id("golang.Go");
        assert!(q.flags().contains(QueryFlags::ALL_VERSIONS));
        let criterion = q.filters[0]
            .criteria
            .iter()
            .find(|c| c.filter_type == FilterType::ExtensionName as i32)
            .unwrap();
        assert_eq!(criterion.value, "golang.Go");
    }

    #[test]
    fn all_versions_by_uuid_sets_all_versions_flag() {
        let q = Query::all_versions_by_uuid("uuid-1");
        assert!(q.flags().contains(QueryFlags::ALL_VERSIONS));
        assert!(!q.flags().contains(QueryFlags::INCLUDE_LATEST_VERSION_ONLY));
    }

    #[test]
    fn latest_by_text_sets_search_criterion_and_page_size() {
        let q = Query::latest_by_text("formatter", 10, SortBy::InstallCount);
        assert_eq!(q.filters[0].page_size, 10);
        assert_eq!(q.filters[0].sort_by, SortBy::InstallCount as i32);
        let search = q.filters[0]
            .criteria
            .iter()
            .find(|c| c.filter_type == FilterType::SearchText as i32)
            .unwrap();
        assert_eq!(search.value, "formatter");
    }
}
