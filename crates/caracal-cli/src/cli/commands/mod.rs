pub mod audit;
pub mod keygen;
pub mod policy;
pub mod replay;
pub mod serve;
pub mod sign;
pub mod verify;

use crate::cli::args::Command;

pub fn dispatch(command: Command) -> i32 {
    match command {
        Command::Keygen(args) => keygen::run(args),
        Command::Sign(args) => sign::run(args),
        Command::Verify(args) => verify::run(args),
        Command::Policy { command } => policy::run(command),
        Command::Replay(args) => replay::run(args),
        Command::Serve(args) => serve::run(args),
        Command::Audit { command } => audit::run(command),
    }
}
