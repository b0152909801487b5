mod cmdline;

use cmdline::Opts;
use coramc_backend::{Backend, VerilogBackend};
use coramc_frontend::ThreadParser;
use coramc_utils::CoramResult;

/// Run the compiler from the command line.
fn main() -> CoramResult<()> {
    let opts = Opts::get_opts();

    // enable tracing
    env_logger::Builder::new()
        .format_timestamp(None)
        .filter_level(opts.log_level)
        .target(env_logger::Target::Stderr)
        .init();

    let program = match &opts.file {
        Some(path) => ThreadParser::parse_file(path)?,
        None => ThreadParser::parse(std::io::stdin())?,
    };

    let ctx = coramc_ir::compile(&program, &opts.thread)?;
    ctx.registry.log_summary(&ctx.name);

    VerilogBackend.run(&ctx, opts.output)
}
