/*!
 * Project data model: projects, files, items and statistics.
 */

pub mod model;

pub use model::{
    DetectedLanguage, Item, ItemStatus, Project, ProjectFile, ProjectStatistics,
};
