//! Built-in transformations
//!
//! Transformations rewrite pivoted records on their way to an exporter.
//! Each one is registered under a key and configured with a
//! `{ kind, config }` document.
//!
//! # Built-in Transformations
//!
//! Whole records:
//! - `equal` - Pass through
//! - `filter_metric` - Drop records by encoding path
//! - `rename_keys` - Rename keys, per encoding path
//! - `flatten_headers` - Merge keys and headers into content
//! - `dummy` - Pass through with a warning
//! - `remove_content_hierarchies` - One record per element of list content
//! - `transformation_per_path` - Dispatch on encoding path
//! - `pipeline` - Steps in sequence
//!
//! Content (one record in, one out):
//! - `field_to_string`, `flatten_hierarchies`, `rename_content`,
//!   `value_mapper`, `convert_to_list`, `convert_to_int`
//! - `combine_content` - Several of the above in a single walk
//!
//! Splitting (one record in, several out):
//! - `extra_keys` - Promote fields to keys
//! - `split_lists` - One record per list element
//! - `combine_series` - Several of the above in a single walk
//!
//! # Example
//!
//! ```yaml
//! transformations:
//!   - kind: extra_keys
//!     config:
//!       path_list:
//!         - Cisco-IOS-XR-ifmgr-oper:interface-properties/interfaces/interface/name
//!   - kind: flatten_hierarchies
//!     config:
//!       keep_naming: true
//!   - kind: value_mapper
//!     config:
//!       leaf_names: [state]
//!       mapper: {up: 1, down: 0}
//! ```

pub mod content;
pub mod metric;
pub mod selector;
pub mod split;

pub use content::{
    CombineContent, ConvertToInt, ConvertToList, FieldToString, FlattenHierarchies, RenameContent,
    ValueMapper,
};
pub use metric::{
    Dummy, Equal, FilterMetric, FlattenHeaders, PerPath, RemoveContentHierarchies, RenameKeys,
};
pub use selector::{ContentSelector, FieldKinds, SelectorConfig};
pub use split::{CombineSeries, ExtraKeys, SplitLists};
