pub mod distinct;
pub mod hash_table;
pub mod heap;
pub mod kway_merge;
pub mod spill;
pub mod total_distinct;
