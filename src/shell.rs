use rustyline::{Editor, Helper, Config, error::ReadlineError, Context};
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use std::path::PathBuf;
use tokio::runtime::Handle;

use crate::engine::ControlHandle;
use crate::error::Error;
use crate::frontend::{dispatch, Reply};
use crate::signals::TOKENS;




/*
    @@@
    @CmdCompleter;
    . Drops CmdCompleter into 'rl.set_helper(Some(...))' and get instant, prefix-based command completion.
    . Completes the operator vocabulary: signal tokens, lifecycle verbs and the pid/status queries.
*/
struct CmdCompleter {
    commands: Vec<String>,
}
impl Helper for CmdCompleter {}
impl Hinter for CmdCompleter {
    type Hint = String;
}
impl Highlighter for CmdCompleter {}
impl Validator for CmdCompleter {}
impl Completer for CmdCompleter {
    type Candidate = Pair;
    fn complete(&self, line: &str, _pos: usize, _ctx: &Context<'_>) -> Result<(usize, Vec<Pair>), ReadlineError> {
        let prefix = line.trim_start().to_lowercase();
        let matches = self
            .commands
            .iter()
            .filter(|cmd| cmd.starts_with(&prefix))
            .map(|cmd| Pair { display: cmd.clone(), replacement: cmd.clone() })
            .collect();
        Ok((0, matches))
    }
}

const HELP: &str = "\
signals: p|pause s|stop c|cont h|hup a|alrm i|int q|quit 1|usr1 2|usr2 t|term in|ttin ou|out|ttou w|winch
lifecycle: k|kill o|once u|up d|down exit
queries: pid status";




/*
    @@@
    @run_shell();
    . Blocking read-eval loop; call it from a plain thread, it drives the engine through `runtime`.
    . Every line goes through frontend::dispatch, the reply is printed.
    . `exit` tears the supervisor down and closes the shell; Ctrl-C/Ctrl-D only close the shell.
*/
pub fn run_shell(control: ControlHandle, runtime: Handle, history: Option<PathBuf>) -> rustyline::Result<()> {
    let config = Config::builder().build();
    let mut rl: Editor<CmdCompleter, DefaultHistory> = Editor::with_config(config)?;
    let mut commands: Vec<String> = TOKENS.iter().map(|t| t.to_string()).collect();
    commands.extend(["pid", "status", "help"].map(String::from));
    rl.set_helper(Some(CmdCompleter { commands }));
    if let Some(path) = &history {
        let _ = rl.load_history(path);
    }

    loop {
        let line = rl.readline("vigil> ");
        match line {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                rl.add_history_entry(input)?;
                if input == "help" {
                    println!("{}", HELP);
                    continue;
                }
                match runtime.block_on(dispatch(&control, input)) {
                    Ok(Reply::Ok) if input.eq_ignore_ascii_case("exit") => break,
                    Ok(reply) => println!("{}", reply),
                    Err(Error::Terminated) => {
                        println!("supervisor terminated");
                        break;
                    }
                    Err(err) => eprintln!("Error: {}", err),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            },
        }
    }

    if let Some(path) = &history {
        rl.save_history(path)?;
    }
    Ok(())
}
