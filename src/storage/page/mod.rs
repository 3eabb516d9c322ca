//! Page types and layout.
//!
//! This module contains:
//! - [`Page`] - The raw block image
//! - [`PageHeader`] - Metadata at the start of every block
//! - [`PageType`] - Discriminator for different block formats

#[allow(clippy::module_inception)]
mod page;
mod page_header;

pub use page::Page;
pub use page_header::{PageHeader, PageType};
