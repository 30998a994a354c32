//! A small writer for the Ninja build-file syntax: `rule` and `build`
//! statement groups, with path escaping per the Ninja manual.

use std::io::Write;

use crate::error::Result;

#[derive(Debug, Default)]
pub struct RuleOpts<'a> {
    pub description: Option<&'a str>,
    pub depfile: Option<&'a str>,
    pub deps: Option<&'a str>,
    pub generator: bool,
    pub restat: bool,
}

pub struct NinjaWriter<W: Write> {
    out: W,
}

impl<W: Write> NinjaWriter<W> {
    pub fn new(out: W) -> Self {
        NinjaWriter { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn comment(&mut self, text: &str) -> Result<()> {
        writeln!(self.out, "# {}", text)?;
        Ok(())
    }

    pub fn newline(&mut self) -> Result<()> {
        writeln!(self.out)?;
        Ok(())
    }

    pub fn rule(&mut self, name: &str, command: &str, opts: &RuleOpts) -> Result<()> {
        writeln!(self.out, "rule {}", name)?;
        writeln!(self.out, "  command = {}", command)?;
        if let Some(description) = opts.description {
            writeln!(self.out, "  description = {}", description)?;
        }
        if let Some(depfile) = opts.depfile {
            writeln!(self.out, "  depfile = {}", depfile)?;
        }
        if let Some(deps) = opts.deps {
            writeln!(self.out, "  deps = {}", deps)?;
        }
        if opts.generator {
            writeln!(self.out, "  generator = 1")?;
        }
        if opts.restat {
            writeln!(self.out, "  restat = 1")?;
        }
        self.newline()
    }

    pub fn build(
        &mut self,
        outputs: &[String],
        rule: &str,
        inputs: &[String],
        implicit: &[String],
        variables: &[(String, String)],
    ) -> Result<()> {
        let mut line = String::from("build ");
        line.push_str(&join_paths(outputs));
        line.push_str(": ");
        line.push_str(rule);
        if !inputs.is_empty() {
            line.push(' ');
            line.push_str(&join_paths(inputs));
        }
        if !implicit.is_empty() {
            line.push_str(" | ");
            line.push_str(&join_paths(implicit));
        }
        writeln!(self.out, "{}", line)?;
        for (name, value) in variables {
            writeln!(self.out, "  {} = {}", name, value)?;
        }
        Ok(())
    }
}

fn join_paths(paths: &[String]) -> String {
    paths
        .iter()
        .map(|p| escape_path(p))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Escape `$`, space and `:` in paths.
pub fn escape_path(path: &str) -> String {
    path.replace('$', "$$").replace(' ', "$ ").replace(':', "$:")
}
