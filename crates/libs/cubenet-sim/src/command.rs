use cubenet_addr::HypercubeAddress;
use cubenet_units::Time;

use crate::SimError;

/// One step of a scenario command: a name with optional arguments,
/// e.g. `newConnection(A, B, 1Mbps, 10ms)` or `joinNetwork`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    name: String,
    params: Vec<String>,
    original: String,
}

impl Function {
    pub fn parse(text: &str) -> Result<Self, SimError> {
        let trimmed = text.trim();
        let Some(open) = trimmed.find('(') else {
            return Ok(Function {
                name: trimmed.to_string(),
                params: Vec::new(),
                original: trimmed.to_string(),
            });
        };
        if !trimmed.ends_with(')') {
            return Err(SimError::scenario(format!("')' expected in '{trimmed}'")));
        }
        let name = trimmed[..open].trim().to_string();
        let inside = &trimmed[open + 1..trimmed.len() - 1];
        let mut params = Vec::new();
        if !inside.trim().is_empty() {
            for raw in split_respecting_quotes(inside, ',')? {
                params.push(unquote(raw.trim())?);
            }
        }
        Ok(Function { name, params, original: trimmed.to_string() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn string_param(&self, n: usize) -> Result<&str, SimError> {
        self.params.get(n).map(String::as_str).ok_or_else(|| {
            SimError::scenario(format!("parameter #{} expected for function {}", n + 1, self.name))
        })
    }

    pub fn bool_param(&self, n: usize) -> Result<bool, SimError> {
        match self.string_param(n)?.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(SimError::scenario(format!(
                "'{other}' is not a valid boolean for parameter {n} of {}",
                self.name
            ))),
        }
    }

    pub fn int_param(&self, n: usize) -> Result<i64, SimError> {
        let text = self.string_param(n)?;
        text.trim()
            .parse()
            .map_err(|_| SimError::scenario(format!("'{text}' is not a number for parameter {n}")))
    }

    pub fn time_param(&self, n: usize) -> Result<Time, SimError> {
        let text = self.string_param(n)?;
        Time::parse(text, Time::SEC).map_err(|e| SimError::scenario(e.to_string()))
    }

    pub fn address_param(&self, n: usize) -> Result<HypercubeAddress, SimError> {
        let text = self.string_param(n)?;
        text.parse().map_err(|e| SimError::scenario(format!("{e}")))
    }
}

/// A dot-separated chain of functions, the unit the scenario runner
/// schedules and executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    functions: Vec<Function>,
}

impl Command {
    pub fn parse(text: &str) -> Result<Self, SimError> {
        let mut functions = Vec::new();
        for part in split_respecting_quotes(text, '.')? {
            functions.push(Function::parse(&part)?);
        }
        if functions.is_empty() {
            return Err(SimError::scenario(format!("empty command '{text}'")));
        }
        Ok(Command { functions })
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }
}

fn unquote(text: &str) -> Result<String, SimError> {
    let starts = text.starts_with('\'');
    let ends = text.len() >= 2 && text.ends_with('\'');
    if starts != ends {
        return Err(SimError::scenario(format!("error in quoted string: {text}")));
    }
    if starts {
        let inner = &text[1..text.len() - 1];
        if inner.contains('\'') {
            return Err(SimError::scenario(format!("more quotes than expected in {text}")));
        }
        return Ok(inner.to_string());
    }
    Ok(text.to_string())
}

/// Split on `separator`, preserving anything inside parentheses or single
/// quotes.
pub fn split_respecting_quotes(text: &str, separator: char) -> Result<Vec<String>, SimError> {
    let mut depth = 0usize;
    let mut quoted = false;
    let mut parts = Vec::new();
    let mut current = String::new();

    for (i, ch) in text.chars().enumerate() {
        if ch == '\'' {
            quoted = !quoted;
            current.push(ch);
            continue;
        }
        if quoted {
            current.push(ch);
            continue;
        }
        match ch {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| SimError::scenario(format!("')' not expected at position {i}")))?;
            }
            _ => {}
        }
        if depth == 0 && ch == separator {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    parts.push(current);
    if depth != 0 {
        return Err(SimError::scenario("')' expected".to_string()));
    }
    if quoted {
        return Err(SimError::scenario("unterminated quote".to_string()));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_function() {
        let f = Function::parse("joinNetwork").unwrap();
        assert_eq!(f.name(), "joinNetwork");
        assert_eq!(f.param_count(), 0);
    }

    #[test]
    fn parses_arguments() {
        let f = Function::parse("newConnection(A, B, 1Mbps, 10ms)").unwrap();
        assert_eq!(f.name(), "newConnection");
        assert_eq!(f.params(), ["A", "B", "1Mbps", "10ms"]);
        assert_eq!(f.time_param(3).unwrap(), Time::from_millis(10));
    }

    #[test]
    fn quoted_arguments_keep_separators() {
        let f = Function::parse("send('a, dotted. value', B)").unwrap();
        assert_eq!(f.params(), ["a, dotted. value", "B"]);
    }

    #[test]
    fn command_splits_on_dots_outside_parens() {
        let c = Command::parse("node(A).traceRoute.assert('10', B)").unwrap();
        let names: Vec<_> = c.functions().iter().map(|f| f.name()).collect();
        assert_eq!(names, ["node", "traceRoute", "assert"]);
    }

    #[test]
    fn dots_inside_arguments_survive() {
        let c = Command::parse("exportConnections(out.csv)").unwrap();
        assert_eq!(c.functions().len(), 1);
        assert_eq!(c.functions()[0].params(), ["out.csv"]);
    }

    #[test]
    fn malformed_input_is_rejected()  {
        assert!(Function::parse("f(a").is_err());
        assert!(Function::parse("f(a'b)").is_err());
        assert!(Command::parse("a.b(").is_err());
        assert!(Function::parse("f()unexpected").is_err());
    }

    #[test]
    fn missing_parameter_reports_position() {
        let f = Function::parse("assertPrimaryAddress()").unwrap();
        let err = f.string_param(0).unwrap_err();
        assert!(err.to_string().contains("parameter #1"));
    }
}
