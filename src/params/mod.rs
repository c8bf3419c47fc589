//! Generation parameters: typed values, built-in presets and the layered resolver.

mod presets;
mod resolver;
mod types;

pub use presets::{builtin_presets, suggest_preset, DEFAULT_PRESET};
pub use resolver::ParameterResolver;
pub use types::{
    option_kind, Flag, GenerationParameters, ParamError, ParamKind, ParamValue, ParameterSet,
    KNOWN_OPTIONS,
};
