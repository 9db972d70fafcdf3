pub mod duration;
pub mod recovery;
pub mod schema;
pub mod sig;

pub use duration::{DurationError, IsoDuration};
pub use recovery::{
    RecoveredVerdict, RecoveryError, TranslationShape, VerdictSource, recover_english,
    recover_translation, recover_translation_shape, recover_verdict,
};
pub use schema::tables;
pub use sig::{
    Decision, InstructionError, IntakeInstruction, OutputRow, Prescription, StructuredSig,
    TranslationResult, ValidationResult, emoji_for,
};
