//! Scriptable test executor.
//!
//! Parameters are a small line-oriented script, one statement per line:
//!
//! ```text
//! USE EXCLUSIVE lpar01 lpar02
//! USE SHARED cpc3
//! ECHO starting install
//! SLEEP 5
//! RETURN 0
//! ```
//!
//! Useful for exercising the scheduler end to end without touching real
//! hardware: resource claims, output capture, sleeps and exit codes are
//! all driven from the request parameters.

use async_trait::async_trait;

use crate::error::{Result, SchedulerError};
use crate::executor::{Executor, ParsedJob};
use crate::scheduler::job::ResourceClaims;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Statement {
    Echo(String),
    Sleep(u64),
    Return(i32),
}

fn parse_script(parameters: &str) -> Result<(ResourceClaims, Vec<Statement>)> {
    let mut claims = ResourceClaims::default();
    let mut statements = Vec::new();

    for (lineno, line) in parameters.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let err = |msg: &str| {
            SchedulerError::ParseError(format!("line {}: {}: {}", lineno + 1, msg, line))
        };

        if let Some(rest) = line.strip_prefix("USE EXCLUSIVE ") {
            claims
                .exclusive
                .extend(rest.split_whitespace().map(str::to_string));
        } else if let Some(rest) = line.strip_prefix("USE SHARED ") {
            claims
                .shared
                .extend(rest.split_whitespace().map(str::to_string));
        } else if let Some(rest) = line.strip_prefix("ECHO ") {
            statements.push(Statement::Echo(rest.to_string()));
        } else if let Some(rest) = line.strip_prefix("SLEEP ") {
            let secs = rest
                .trim()
                .parse::<u64>()
                .map_err(|_| err("invalid sleep duration"))?;
            statements.push(Statement::Sleep(secs));
        } else if let Some(rest) = line.strip_prefix("RETURN ") {
            let code = rest
                .trim()
                .parse::<i32>()
                .map_err(|_| err("invalid return code"))?;
            statements.push(Statement::Return(code));
        } else {
            return Err(err("unknown statement"));
        }
    }

    Ok((claims, statements))
}

/// Static parse entry point registered with the executor registry.
pub fn parse(parameters: &str) -> Result<ParsedJob> {
    let (resources, statements) = parse_script(parameters)?;
    let description = statements
        .iter()
        .find_map(|s| match s {
            Statement::Echo(msg) => Some(format!("Echo: {}", msg)),
            _ => None,
        })
        .unwrap_or_else(|| "Echo script".to_string());
    Ok(ParsedJob {
        resources,
        description,
    })
}

/// Static build entry point registered with the executor registry.
pub fn build(parameters: &str) -> Result<Box<dyn Executor>> {
    let (_, statements) = parse_script(parameters)?;
    Ok(Box::new(EchoExecutor { statements }))
}

pub struct EchoExecutor {
    statements: Vec<Statement>,
}

#[async_trait]
impl Executor for EchoExecutor {
    async fn run(&mut self) -> Result<i32> {
        for statement in &self.statements {
            match statement {
                Statement::Echo(msg) => println!("{}", msg),
                Statement::Sleep(secs) => {
                    tokio::time::sleep(std::time::Duration::from_secs(*secs)).await;
                }
                Statement::Return(code) => return Ok(*code),
            }
        }
        Ok(0)
    }

    async fn cleanup(&mut self) -> Result<()> {
        println!("echo executor cleaning up");
        Ok(())
    }
}
