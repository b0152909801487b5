use coramc_ir::ThreadContext;
use coramc_utils::{CoramResult, OutputFile};

/// All backends must implement this trait.
/// `Backend::validate` should return `Ok(())` if the compiled thread is
/// in the expected form and `Err(..)` otherwise. `Backend::emit` writes
/// the formatted output. `Backend::run` is the composition of the two.
pub trait Backend {
    /// The name of this backend.
    fn name(&self) -> &'static str;
    /// Validate the compiled thread for emission with this backend.
    fn validate(ctx: &ThreadContext) -> CoramResult<()>;
    /// Write the thread out through `file`.
    fn emit(ctx: &ThreadContext, file: &mut OutputFile) -> CoramResult<()>;
    /// Convenience function to validate and emit the thread.
    fn run(&self, ctx: &ThreadContext, mut file: OutputFile) -> CoramResult<()>
    where
        Self: Sized,
    {
        Self::validate(ctx)?;
        Self::emit(ctx, &mut file)
    }
}
