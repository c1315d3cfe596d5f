pub type CmdResult<T> = release_forge::Result<(T, i32)>;

pub(crate) struct GlobalArgs {}

pub mod template;

macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (release_forge::Result<serde_json::Value>, i32) {
    crate::tty::status("release-forge is working...");

    match command {
        crate::Commands::Template(args) => dispatch!(args, global, template),
    }
}
