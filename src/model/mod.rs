pub mod identifier;
pub mod work_item;

pub use identifier::Identifier;
pub use work_item::WorkItemRecord;
