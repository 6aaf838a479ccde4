//! Utility functions shared by the fetcher, the mapping rules and the writer.
//!
//! - **Text processing**: character-safe truncation, HTML stripping, list splitting
//! - **URL normalization**: shop API origin and storefront base URL
//!
//! # Examples
//!
//! ```
//! use shopfeed::util::{split_list, truncate_chars};
//!
//! let tags = split_list(Some("nike, sneakers"), ',');
//! assert_eq!(tags, vec!["nike", "sneakers"]);
//!
//! let title = truncate_chars("A very long product title", 10);
//! assert_eq!(title, "A very ...");
//! ```

mod shop_url;
mod text;

pub use shop_url::{normalize_base_url, normalize_shop_url, UrlError};
pub use text::{split_list, strip_control_chars, strip_html, truncate_chars, ELLIPSIS};
