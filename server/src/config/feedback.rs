/*
 * This file is part of meshreg.
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! Fatal vs advisory feedback collected while merging configuration
//! sources. An [`ErrorStack`] aborts startup; a [`WarningStack`] is
//! logged and merging proceeds regardless.

use crate::util::error::{Error, ErrorKind};
use core::fmt;
use core::ops;
use std::io::Error as IoError;

const TAB: &str = "    ";

#[derive(Debug, PartialEq)]
pub struct FeedbackStack {
    stack: Vec<String>,
    feedback_type: &'static str,
    feedback_source: &'static str,
}

impl FeedbackStack {
    fn new(feedback_source: &'static str, feedback_type: &'static str) -> Self {
        Self {
            stack: Vec::new(),
            feedback_type,
            feedback_source,
        }
    }
    pub fn source(&self) -> &'static str {
        self.feedback_source
    }
    pub fn push(&mut self, f: impl ToString) {
        self.stack.push(f.to_string())
    }
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

impl fmt::Display for FeedbackStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_empty() {
            write!(f, "{} {}:", self.feedback_source, self.feedback_type)?;
            for err in self.stack.iter() {
                write!(f, "\n{}- {}", TAB, err)?;
            }
        }
        Ok(())
    }
}

impl ops::Deref for FeedbackStack {
    type Target = Vec<String>;
    fn deref(&self) -> &Self::Target {
        &self.stack
    }
}
impl ops::DerefMut for FeedbackStack {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.stack
    }
}

#[derive(Debug, PartialEq)]
pub struct ErrorStack {
    feedback: FeedbackStack,
}

impl ErrorStack {
    pub fn new(err_source: &'static str) -> Self {
        Self {
            feedback: FeedbackStack::new(err_source, "errors"),
        }
    }
}

impl fmt::Display for ErrorStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.feedback)
    }
}

impl ops::Deref for ErrorStack {
    type Target = FeedbackStack;
    fn deref(&self) -> &Self::Target {
        &self.feedback
    }
}

impl ops::DerefMut for ErrorStack {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.feedback
    }
}

#[derive(Debug, PartialEq)]
pub struct WarningStack {
    feedback: FeedbackStack,
}

impl WarningStack {
    pub fn new(warning_source: &'static str) -> Self {
        Self {
            feedback: FeedbackStack::new(warning_source, "warnings"),
        }
    }
    pub fn print_warnings(&self) {
        if !self.feedback.is_empty() {
            log::warn!("{}", self);
        }
    }
}

impl ops::Deref for WarningStack {
    type Target = FeedbackStack;
    fn deref(&self) -> &Self::Target {
        &self.feedback
    }
}

impl ops::DerefMut for WarningStack {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.feedback
    }
}

impl fmt::Display for WarningStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.feedback)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    OSError(IoError),
    CfgError(ErrorStack),
    ConfigFileParseError(serde_yaml::Error),
    Conflict,
}

impl From<IoError> for ConfigError {
    fn from(e: IoError) -> Self {
        Self::OSError(e)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::ConfigFileParseError(e)
    }
}

impl From<ErrorStack> for ConfigError {
    fn from(e: ErrorStack) -> Self {
        Self::CfgError(e)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigFileParseError(e) => write!(f, "configuration file parse failed: {e}"),
            Self::OSError(e) => write!(f, "OS error: {e}"),
            Self::CfgError(e) => write!(f, "{e}"),
            Self::Conflict => write!(
                f,
                "conflict: provide either CLI args, environment variables or a config file, not more than one"
            ),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::with_context(ErrorKind::CreateError, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errorstack_fmt() {
        const EXPECTED: &str = "\
Environment errors:
    - Invalid value for `reconnect_interval`. Expected a positive integer\
";
        let mut estk = ErrorStack::new("Environment");
        estk.push("Invalid value for `reconnect_interval`. Expected a positive integer");
        assert_eq!(format!("{estk}"), EXPECTED);
    }

    #[test]
    fn warningstack_fmt() {
        const EXPECTED: &str = "\
Environment warnings:
    - unknown key `snapevery` ignored\
";
        let mut wstk = WarningStack::new("Environment");
        wstk.push("unknown key `snapevery` ignored");
        assert_eq!(format!("{wstk}"), EXPECTED);
    }
}
