// Core modules implementing module loading, ABI binding, fault isolation, and error modeling.
pub mod error;
pub mod fault;
pub mod params;
pub mod pipeline;
pub mod runtime;
pub mod symbols;
