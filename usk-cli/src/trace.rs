use anyhow::{bail, Context, Result};

/// One instruction of a scan trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Physically plug a module in (by peripheral name or hex address).
    Attach(String),
    Detach(String),
    /// Run `init()` now instead of right before the first cycle.
    Boot,
    /// Hold these logical keys for `cycles` scans.
    Hold { keys: Vec<(u8, u8)>, cycles: u32 },
    /// Let `skip` transactions to `address` through, then fail `count`.
    Fault { address: u8, count: u32, skip: u32 },
}

/// A parsed trace: an optional board name and the steps with their line
/// numbers.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    pub board: Option<String>,
    pub steps: Vec<(usize, Step)>,
}

/// Parse the line-oriented trace format.
///
/// ```text
/// board usk-right
/// attach numpad
/// hold 0,0 6,1 x5
/// fault 0x20 1 after 7
/// ```
pub fn parse_trace(input: &str) -> Result<Trace> {
    let mut trace = Trace::default();

    for (line_num, line) in input.lines().enumerate() {
        let line_num = line_num + 1;
        let line = match line.find('#') {
            Some(comment) => &line[..comment],
            None => line,
        };
        let mut words = line.split_whitespace();
        let Some(keyword) = words.next() else {
            continue;
        };
        let args: Vec<&str> = words.collect();

        let step = match keyword {
            "board" => {
                if !trace.steps.is_empty() {
                    bail!("line {}: board must come before any step", line_num);
                }
                let [name] = args[..] else {
                    bail!("line {}: expected `board <name>`", line_num);
                };
                trace.board = Some(name.to_string());
                continue;
            }
            "attach" | "detach" => {
                let [target] = args[..] else {
                    bail!("line {}: expected `{} <name|address>`", line_num, keyword);
                };
                if keyword == "attach" {
                    Step::Attach(target.to_string())
                } else {
                    Step::Detach(target.to_string())
                }
            }
            "boot" => {
                if !args.is_empty() {
                    bail!("line {}: `boot` takes no arguments", line_num);
                }
                Step::Boot
            }
            "hold" => parse_hold(&args).with_context(|| format!("line {}", line_num))?,
            "fault" => parse_fault(&args).with_context(|| format!("line {}", line_num))?,
            other => bail!("line {}: unknown keyword `{}`", line_num, other),
        };
        trace.steps.push((line_num, step));
    }

    Ok(trace)
}

fn parse_hold(args: &[&str]) -> Result<Step> {
    let mut keys = Vec::new();
    let mut cycles = 1;

    for (i, arg) in args.iter().enumerate() {
        if let Some(count) = arg.strip_prefix('x') {
            if i + 1 != args.len() {
                bail!("repeat count must be the last argument");
            }
            cycles = count
                .parse()
                .with_context(|| format!("invalid repeat count `{}`", arg))?;
            continue;
        }
        let (row, col) = arg
            .split_once(',')
            .with_context(|| format!("expected `row,col`, got `{}`", arg))?;
        let row = row.parse().with_context(|| format!("invalid row in `{}`", arg))?;
        let col = col.parse().with_context(|| format!("invalid column in `{}`", arg))?;
        keys.push((row, col));
    }

    if cycles == 0 {
        bail!("repeat count must be at least 1");
    }
    Ok(Step::Hold { keys, cycles })
}

fn parse_fault(args: &[&str]) -> Result<Step> {
    let (address, count, skip) = match args {
        [address, count] => (address, count, "0"),
        [address, count, "after", skip] => (address, count, *skip),
        _ => bail!("expected `fault <address> <count> [after <n>]`"),
    };
    Ok(Step::Fault {
        address: parse_address(address)?,
        count: count
            .parse()
            .with_context(|| format!("invalid fault count `{}`", count))?,
        skip: skip
            .parse()
            .with_context(|| format!("invalid skip count `{}`", skip))?,
    })
}

/// Parse `0x23` style addresses.
pub fn parse_address(text: &str) -> Result<u8> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .with_context(|| format!("expected a hex address like 0x23, got `{}`", text))?;
    let address =
        u8::from_str_radix(digits, 16).with_context(|| format!("invalid address `{}`", text))?;
    if address > 0x7F {
        bail!("address {} is not a 7-bit address", text);
    }
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_trace() {
        let trace = parse_trace(
            "# numpad plugged in late\n\
             board usk-right\n\
             \n\
             hold 0,0 x5   # press\n\
             attach numpad\n\
             hold\n\
             fault 0x20 1 after 7\n\
             boot\n",
        )
        .unwrap();
        assert_eq!(trace.board.as_deref(), Some("usk-right"));
        assert_eq!(
            trace.steps,
            vec![
                (
                    4,
                    Step::Hold {
                        keys: vec![(0, 0)],
                        cycles: 5
                    }
                ),
                (5, Step::Attach("numpad".to_string())),
                (
                    6,
                    Step::Hold {
                        keys: vec![],
                        cycles: 1
                    }
                ),
                (
                    7,
                    Step::Fault {
                        address: 0x20,
                        count: 1,
                        skip: 7
                    }
                ),
                (8, Step::Boot),
            ]
        );
    }

    #[test]
    fn test_board_after_steps() {
        assert!(parse_trace("hold x2\nboard usk-right\n").is_err());
    }

    #[test]
    fn test_bad_key() {
        let err = parse_trace("hold 0;0\n").unwrap_err();
        assert!(format!("{:#}", err).contains("line 1"));
        assert!(parse_trace("hold 300,0\n").is_err());
        assert!(parse_trace("hold 0,0 x0\n").is_err());
        assert!(parse_trace("hold x2 0,0\n").is_err());
    }

    #[test]
    fn test_unknown_keyword() {
        assert!(parse_trace("press 0,0\n").is_err());
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x23").unwrap(), 0x23);
        assert!(parse_address("23").is_err());
        assert!(parse_address("0x80").is_err());
    }
}
