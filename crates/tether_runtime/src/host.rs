//! A runtime plus one context, with the host functions scripts expect

use crate::json;
use anyhow::{Context as _, Result};
use std::cell::RefCell;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;
use tether_script::{Bytecode, Config, Context, Native, Runtime};

type Output = Rc<RefCell<Box<dyn Write>>>;

pub struct Host {
    // Declared before the runtime so it is released first.
    context: Context,
    runtime: Runtime,
}

impl Host {
    /// Creates a host whose `print` writes to stdout.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_output(config, std::io::stdout())
    }

    pub fn with_output(config: Config, output: impl Write + 'static) -> Result<Self> {
        let runtime = Runtime::with_config(config)?;
        let context = runtime.new_context()?;
        let writer: Box<dyn Write> = Box::new(output);
        let output: Output = Rc::new(RefCell::new(writer));

        let global = context.global_object()?;
        global.set_function("print", move |args| {
            let line = args
                .iter()
                .map(json::display)
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(output.borrow_mut(), "{line}")?;
            Ok(Native::Null)
        })?;

        tracing::info!("Tether v{}", tether_script::VERSION);
        Ok(Self { context, runtime })
    }

    pub fn eval(&mut self, source: &str) -> Result<Native> {
        Ok(self.context.eval(source)?.to_native()?)
    }

    pub fn eval_file(&mut self, path: &Path) -> Result<Native> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display()))?;
        self.eval(&source)
    }

    pub fn exec(&mut self, bytecode: &Bytecode) -> Result<Native> {
        Ok(self.context.eval_binary(bytecode)?.to_native()?)
    }

    pub fn exec_file(&mut self, path: &Path) -> Result<Native> {
        let bytes =
            std::fs::read(path).with_context(|| format!("could not read {}", path.display()))?;
        self.exec(&Bytecode::from(bytes))
    }

    pub fn compile_file(&self, path: &Path, output: &Path) -> Result<usize> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display()))?;
        let bytecode = self.context.compile(&source)?;
        std::fs::write(output, bytecode.as_bytes())
            .with_context(|| format!("could not write {}", output.display()))?;
        tracing::info!(bytes = bytecode.len(), output = %output.display(), "bytecode written");
        Ok(bytecode.len())
    }

    pub fn free(mut self) {
        self.context.free();
        self.runtime.free();
    }
}
