//! AST visitors shared by the pipeline stages.

pub mod module_collector;
pub mod reference_collector;
pub mod type_stripper;
pub mod using_lowering;
