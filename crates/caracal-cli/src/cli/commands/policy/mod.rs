pub mod migrate;
pub mod validate;

use crate::cli::args::PolicyCommand;

pub fn run(command: PolicyCommand) -> i32 {
    match command {
        PolicyCommand::Validate(args) => validate::run(args),
        PolicyCommand::Migrate(args) => migrate::run(args),
    }
}
