pub mod table;
pub mod conflict;
pub mod page;
pub mod analysis;
pub mod dual_source;

pub use table::*;
pub use conflict::*;
pub use page::*;
pub use analysis::*;
pub use dual_source::*;
