use std::env;
use std::process;

use log::info;

use lantern::error::ZResult;
use lantern::interpreter::Interpreter;
use lantern::memory::Memory;
use lantern::screen::TerminalScreen;
use lantern::vm::VM;
use lantern::zrand::ZRand;

fn usage() -> ! {
    eprintln!("usage: lantern [--debug] <story-file>");
    process::exit(2);
}

fn main() {
    env_logger::init();

    let mut debug = false;
    let mut story: Option<String> = None;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--debug" | "-d" => debug = true,
            _ if arg.starts_with('-') => usage(),
            _ if story.is_none() => story = Some(arg),
            _ => usage(),
        }
    }
    let Some(path) = story else { usage() };

    if let Err(e) = play(&path, debug) {
        eprintln!("lantern: {e}");
        process::exit(1);
    }
}

fn play(path: &str, debug: bool) -> ZResult<()> {
    let memory = Memory::from_file(path)?;
    info!("{}", memory.header);
    let vm = VM::new(memory, ZRand::new())?;
    let mut interp = Interpreter::new(vm, Box::new(TerminalScreen::new()))?;
    interp.set_debug(debug);
    interp.run()
}
