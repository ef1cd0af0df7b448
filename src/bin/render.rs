use log::debug;
use nix::{sys::wait::waitpid, unistd::Pid};
use std::process::exit;

use dprint_rs::{
    diag::{Error, Result},
    inferior::Inferior,
    input::{env, Invocation},
    param::Location,
    process::Image,
    registry::Registry,
    render::Renderer,
    summary::Category,
    trace,
};

struct Wrapper {
    function: String,
    type_name: String,
    location: Location,
    program: String,
    registry: Registry,
}

impl Wrapper {
    fn new(invocation: &Invocation) -> Result<Self> {
        let [function, type_name, location] = invocation.operands.as_slice() else {
            return Err(Error::from("expected FUNCTION TYPE LOCATION"));
        };

        Ok(Self {
            function: function.clone(),
            type_name: type_name.clone(),
            location: Location::try_from(location.as_str())?,
            program: invocation.program.clone(),
            registry: Registry::from_env()?,
        })
    }

    fn show(&self, pid: Pid, image: &Image) -> Result<()> {
        let mut category = Category::new("Rust");
        category.install(&self.registry)?;

        let mut inferior = Inferior::new(pid, image);
        let variable = inferior.variable(&self.type_name, &self.location)?;
        let renderer = Renderer::new(&self.registry);
        let out = category
            .provide(&renderer, &variable, &mut inferior)
            .unwrap_or_else(|| format!("<no summary for {}>", self.type_name));

        println!("{} @ {} = {out}", self.type_name, self.location);
        Ok(())
    }
}

impl trace::Tracer for Wrapper {
    fn trace(&self, pid: Pid) -> Result<i32> {
        waitpid(pid, None)?;

        let image = Image::build(&self.program, pid)?;
        let addr = image.symbol(&self.function).ok_or_else(|| {
            Error::from(format!("Function \"{}\" not defined.", self.function))
        })?;
        debug!("running to {} at {addr:#x}", self.function);

        if let Some(code) = trace::run_to(pid, addr)? {
            return Ok(code);
        }

        self.show(pid, &image)?;
        trace::finish(pid)
    }
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    let invocation = Invocation::parse(&["FUNCTION", "TYPE", "LOCATION"])?;
    exit(trace::run::<Wrapper>(
        &Wrapper::new(&invocation)?,
        &invocation.argv()?,
        &env()?,
    )?)
}
