use std::process::{self, exit};

use dprint_rs::{
    diag::{Error, Result},
    input::Invocation,
    mi::Session,
    registry::Registry,
    render::Renderer,
    summary::Category,
};

const GDB_VAR: &str = "GDB";

fn show(session: &mut Session, expr: &str, registry: &Registry) -> Result<()> {
    let mut category = Category::new("Rust");
    category.install(registry)?;

    let value = session.value(expr)?;
    let renderer = Renderer::new(registry);
    let out = match category.provide(&renderer, &value, session) {
        Some(out) => out,
        None => session.evaluate(value.expr())?,
    };

    println!("{} = {out}", value.expr());
    Ok(())
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    let invocation = Invocation::parse(&["FUNCTION", "EXPR"])?;
    let [function, expr] = invocation.operands.as_slice() else {
        return Err(Error::from("expected FUNCTION EXPR"));
    };
    let registry = Registry::from_env()?;
    let gdb = std::env::var(GDB_VAR).unwrap_or_else(|_| "gdb".to_string());

    // The program writes where we do.
    let tty = format!("/proc/{}/fd/1", process::id());
    let mut session = Session::start(&gdb, &tty, &invocation.program, &invocation.args)?;
    session.run_to(function)?;

    show(&mut session, expr, &registry)?;
    let code = session.finish()?;
    session.exit()?;
    exit(code)
}
