//! Application layer: background population and the tree model.

pub mod error;
pub mod events;
pub mod model;
pub mod population;

pub use error::{ApplicationError, ApplicationResult};
pub use events::{EventBus, TreeEvent};
pub use model::{ModelIndex, TreeModel};
pub use population::{Population, PopulationOptions, DEFAULT_BATCH_SIZE};
