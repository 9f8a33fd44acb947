//! Where volumes come from.

pub mod directory;
pub mod memory;

pub use directory::DirectorySource;
pub use memory::MemorySource;

use async_trait::async_trait;

use radflow_descriptor::DataTypeDescriptor;
use radflow_types::{Result, Volume};

use crate::config::TimeWindow;
use crate::timeline::TimelineEntry;

#[async_trait]
pub trait VolumeSource: Send + Sync {
    /// Timestamps and locators of `clock` files of `scan` inside `window`.
    /// Order is not significant; the caller sorts.
    async fn list_timestamps(
        &self,
        scan: Option<&str>,
        clock: &DataTypeDescriptor,
        window: &TimeWindow,
    ) -> Result<Vec<TimelineEntry>>;

    /// Load the working volume of one step with the `required` inputs.
    /// A volume that cannot be produced is [`radflow_types::FlowError::VolumeNotFound`].
    async fn fetch_volume(
        &self,
        entry: &TimelineEntry,
        required: &[DataTypeDescriptor],
    ) -> Result<Volume>;
}
