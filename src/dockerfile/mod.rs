//! Dynamic command dispatch → tagged variants (§9 Design Notes). Replaces the
//! source's map-of-function-pointers with a sum type; pre-hook/main-hook
//! become match arms in [`crate::dispatch`].

pub mod parser;

use crate::error::{Error, Result};
use parser::RawInstruction;

/// One of the 16 standard instructions (§2), still holding its raw argument
/// string — per-instruction argument parsing (splitting, exec-form
/// detection) happens in the pre-hook, after variable expansion where
/// applicable.
#[derive(Debug, Clone)]
pub enum Instruction {
    From { raw: String, lineno: usize },
    Arg { raw: String, lineno: usize },
    Cmd { raw: String, lineno: usize },
    Copy { raw: String, lineno: usize },
    Entrypoint { raw: String, lineno: usize },
    Env { raw: String, lineno: usize },
    Expose { raw: String, lineno: usize },
    Label { raw: String, lineno: usize },
    Maintainer { raw: String, lineno: usize },
    Onbuild { raw: String, lineno: usize },
    Run { raw: String, lineno: usize },
    StopSignal { raw: String, lineno: usize },
    User { raw: String, lineno: usize },
    Volume { raw: String, lineno: usize },
    Workdir { raw: String, lineno: usize },
    /// `ADD` is modeled distinctly from `COPY` even though both flow through
    /// the Copy Pipeline, since only `ADD` recognizes remote URLs/archives.
    Add { raw: String, lineno: usize },
}

impl Instruction {
    pub fn name(&self) -> &'static str {
        match self {
            Instruction::From { .. } => "FROM",
            Instruction::Arg { .. } => "ARG",
            Instruction::Cmd { .. } => "CMD",
            Instruction::Copy { .. } => "COPY",
            Instruction::Entrypoint { .. } => "ENTRYPOINT",
            Instruction::Env { .. } => "ENV",
            Instruction::Expose { .. } => "EXPOSE",
            Instruction::Label { .. } => "LABEL",
            Instruction::Maintainer { .. } => "MAINTAINER",
            Instruction::Onbuild { .. } => "ONBUILD",
            Instruction::Run { .. } => "RUN",
            Instruction::StopSignal { .. } => "STOPSIGNAL",
            Instruction::User { .. } => "USER",
            Instruction::Volume { .. } => "VOLUME",
            Instruction::Workdir { .. } => "WORKDIR",
            Instruction::Add { .. } => "ADD",
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            Instruction::From { raw, .. }
            | Instruction::Arg { raw, .. }
            | Instruction::Cmd { raw, .. }
            | Instruction::Copy { raw, .. }
            | Instruction::Entrypoint { raw, .. }
            | Instruction::Env { raw, .. }
            | Instruction::Expose { raw, .. }
            | Instruction::Label { raw, .. }
            | Instruction::Maintainer { raw, .. }
            | Instruction::Onbuild { raw, .. }
            | Instruction::Run { raw, .. }
            | Instruction::StopSignal { raw, .. }
            | Instruction::User { raw, .. }
            | Instruction::Volume { raw, .. }
            | Instruction::Workdir { raw, .. }
            | Instruction::Add { raw, .. } => raw,
        }
    }

    /// Whether this instruction's arguments undergo `$VAR` expansion before
    /// the main-hook runs (§4.4). `RUN`, `CMD`, `ENTRYPOINT`, `FROM`,
    /// `MAINTAINER` are excluded.
    pub fn expands_args(&self) -> bool {
        !matches!(
            self,
            Instruction::Run { .. }
                | Instruction::Cmd { .. }
                | Instruction::Entrypoint { .. }
                | Instruction::From { .. }
                | Instruction::Maintainer { .. }
        )
    }

    pub fn from_raw(raw: RawInstruction) -> Result<Self> {
        let RawInstruction {
            name, args, raw: text, lineno,
        } = raw;
        let raw = format!("{name} {args}").trim().to_string();
        let _ = text;

        Ok(match name.as_str() {
            "FROM" => Instruction::From { raw, lineno },
            "ARG" => Instruction::Arg { raw, lineno },
            "CMD" => Instruction::Cmd { raw, lineno },
            "COPY" => Instruction::Copy { raw, lineno },
            "ENTRYPOINT" => Instruction::Entrypoint { raw, lineno },
            "ENV" => Instruction::Env { raw, lineno },
            "EXPOSE" => Instruction::Expose { raw, lineno },
            "LABEL" => Instruction::Label { raw, lineno },
            "MAINTAINER" => Instruction::Maintainer { raw, lineno },
            "ONBUILD" => Instruction::Onbuild { raw, lineno },
            "RUN" => Instruction::Run { raw, lineno },
            "STOPSIGNAL" => Instruction::StopSignal { raw, lineno },
            "USER" => Instruction::User { raw, lineno },
            "VOLUME" => Instruction::Volume { raw, lineno },
            "WORKDIR" => Instruction::Workdir { raw, lineno },
            "ADD" => Instruction::Add { raw, lineno },
            other => {
                return Err(Error::InputError(format!(
                    "unknown instruction: {other}"
                )))
            }
        })
    }

    /// Arguments only (without the leading instruction name).
    pub fn args_str(&self) -> &str {
        self.raw()
            .splitn(2, char::is_whitespace)
            .nth(1)
            .unwrap_or("")
            .trim_start()
    }
}

/// Parse a single raw Dockerfile line (used to expand `ONBUILD` triggers
/// stored verbatim in a base image's config, §4.4/§4.7 step 9).
pub fn parse_single_line(line: &str) -> Result<Instruction> {
    let mut raws = parser::parse(line)?;
    if raws.len() != 1 {
        return Err(Error::InputError(format!(
            "expected exactly one instruction, got {}",
            raws.len()
        )));
    }
    Instruction::from_raw(raws.remove(0))
}
