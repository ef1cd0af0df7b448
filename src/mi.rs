use log::{debug, trace, warn};
use nix::sys::signal::Signal;
use regex::Regex;
use std::{
    io::{self, BufRead, BufReader, Write},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
};

use crate::{
    diag::{Error, Result},
    remote::{self, Returned, Target},
    value::{Storage, Value, INVALID_ADDRESS},
};

const PROMPT: &str = "(gdb)";
const CHUNK: u64 = 64;
const SETTINGS: [&str; 3] = [
    "-gdb-set print elements 2048",
    "-gdb-set print repeats unlimited",
    "-gdb-set confirm off",
];

#[derive(Debug, Clone)]
/// A result record and the out-of-band records that preceded it.
pub struct Response {
    pub result: String,
    pub records: Vec<String>,
}

impl Response {
    /// The `msg` of an `^error` result record.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        if self.result.starts_with("^error") {
            Some(field(&self.result, "msg").unwrap_or_else(|| self.result.clone()))
        } else {
            None
        }
    }
}

/// An expression of the debugged program, as seen by GDB.
pub struct Expr {
    expr: String,
    type_name: String,
    storage: Storage,
    address_of: Option<u64>,
}

impl Expr {
    #[must_use]
    pub fn expr(&self) -> &str {
        &self.expr
    }
}

impl Value for Expr {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn storage(&self) -> Storage {
        self.storage
    }

    /// Value of `&(expr)`, when GDB could take the address.
    fn address_of(&self) -> Option<u64> {
        self.address_of
    }
}

/// A GDB process driven over the machine interface.
pub struct Session {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Session {
    /// Spawn `gdb` on `program` and wait for its first prompt.
    ///
    /// The program's own input and output go to `tty`, keeping them off the
    /// machine interface pipe.
    ///
    /// # Errors
    ///
    /// Returns an error if `gdb` cannot be launched, exits before prompting,
    /// or rejects `tty`.
    pub fn start(gdb: &str, tty: &str, program: &str, args: &[String]) -> Result<Self> {
        let mut child = Command::new(gdb)
            .arg("-q")
            .arg("-i=mi")
            .arg("--args")
            .arg(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    Error::from(format!("{gdb}: not found"))
                } else {
                    Error::from(format!("failed to launch {gdb}: {e}"))
                }
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::from("failed to open gdb stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::from("failed to open gdb stdout"))?;

        let mut session = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };
        while session.read_line()? != PROMPT {}
        session.execute(&format!("-inferior-tty-set {tty}"))?;

        for setting in SETTINGS {
            if let Err(e) = session.execute(setting) {
                warn!("{setting}: {}", e.message());
            }
        }

        Ok(session)
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Err(Error::from("gdb exited unexpectedly"));
        }
        let line = line.trim().to_string();
        trace!("[mi<-] {line}");
        Ok(line)
    }

    /// Send `command` and collect everything up to its result record and
    /// the following prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipe to `gdb` breaks.
    pub fn send(&mut self, command: &str) -> Result<Response> {
        trace!("[mi->] {command}");
        writeln!(self.stdin, "{command}")?;
        self.stdin.flush()?;

        let mut records = Vec::new();
        let mut result = None;
        loop {
            let line = self.read_line()?;
            if line == PROMPT {
                if result.is_some() {
                    break;
                }
            } else if line.starts_with('^') {
                result = Some(line);
            } else if !line.is_empty() {
                records.push(line);
            }
        }

        Ok(Response {
            result: result.unwrap_or_default(),
            records,
        })
    }

    /// Send `command`, turning an `^error` result into an `Err`.
    ///
    /// # Errors
    ///
    /// Returns GDB's error message, or an error if the pipe breaks.
    pub fn execute(&mut self, command: &str) -> Result<Response> {
        let response = self.send(command)?;
        match response.error() {
            Some(msg) => Err(Error::from(msg)),
            None => Ok(response),
        }
    }

    /// Run the program until it enters `function`.
    ///
    /// # Errors
    ///
    /// Returns an error if the breakpoint cannot be set, or if the program
    /// exits before reaching it.
    pub fn run_to(&mut self, function: &str) -> Result<()> {
        self.execute(&format!("-break-insert {function}"))?;
        let response = self.execute("-exec-run")?;

        let stopped = match response.records.into_iter().find(|r| r.starts_with("*stopped")) {
            Some(record) => record,
            None => self.wait_for_stop()?,
        };

        let reason = field(&stopped, "reason").unwrap_or_default();
        debug!("stopped: {reason}");
        if reason.starts_with("exited") {
            return Err(Error::from(format!(
                "program {reason} before reaching {function}"
            )));
        }

        Ok(())
    }

    /// Let the program run to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be resumed.
    ///
    /// # Returns
    ///
    /// The exit code, or the signal number if the program was killed.
    pub fn finish(&mut self) -> Result<i32> {
        loop {
            let response = self.execute("-exec-continue")?;
            let stopped = match response.records.into_iter().find(|r| r.starts_with("*stopped")) {
                Some(record) => record,
                None => self.wait_for_stop()?,
            };

            if let Some(code) = exit_code(&stopped) {
                eprintln!("+++ exited with {code} +++");
                return Ok(code);
            }
            debug!("stopped again: {stopped}");
        }
    }

    fn wait_for_stop(&mut self) -> Result<String> {
        loop {
            let line = self.read_line()?;
            if line.starts_with("*stopped") {
                return Ok(line);
            }
        }
    }

    /// Evaluate `expr` and return GDB's rendering of its value.
    ///
    /// # Errors
    ///
    /// Returns GDB's error message if the expression cannot be evaluated.
    pub fn evaluate(&mut self, expr: &str) -> Result<String> {
        let response = self.execute(&format!(
            "-data-evaluate-expression {}",
            mi_escape(expr)
        ))?;
        field(&response.result, "value")
            .ok_or_else(|| Error::from(format!("no value for {expr}")))
    }

    fn load_address(&mut self, expr: &str) -> Option<u64> {
        let command = format!(
            "-interpreter-exec console {}",
            mi_escape(&format!("info address {expr}"))
        );
        match self.execute(&command) {
            Ok(response) => static_address(&console(&response.records)),
            Err(e) => {
                debug!("info address {expr}: {}", e.message());
                None
            }
        }
    }

    fn type_of(&mut self, expr: &str) -> Result<String> {
        let response = self.execute(&format!("-var-create - * {}", mi_escape(expr)))?;
        let name = field(&response.result, "name");
        let type_name = field(&response.result, "type")
            .ok_or_else(|| Error::from(format!("no type for {expr}")))?;
        if let Some(name) = name {
            if let Err(e) = self.execute(&format!("-var-delete {name}")) {
                warn!("-var-delete {name}: {}", e.message());
            }
        }
        Ok(type_tag(&type_name).to_string())
    }

    /// Build the value handle for `expr`.
    ///
    /// # Errors
    ///
    /// Returns an error if GDB cannot type or evaluate `expr`.
    pub fn value(&mut self, expr: &str) -> Result<Expr> {
        let type_name = self.type_of(expr)?;

        if is_pointer_type(&type_name) {
            let value = self.evaluate(expr)?;
            let storage = Storage::Pointer(
                parse_hex(&value).ok_or_else(|| Error::from(format!("{expr} = {value}")))?,
            );
            return Ok(Expr {
                expr: expr.to_string(),
                type_name,
                storage,
                address_of: None,
            });
        }

        let load = self.load_address(expr);
        let address_of = match self.evaluate(&format!("&({expr})")) {
            Ok(addr) => parse_hex(&addr),
            Err(e) => {
                debug!("&({expr}): {}", e.message());
                None
            }
        };
        let storage = storage_of(load, address_of);
        debug!("{expr}: {type_name} {storage:?}, &: {address_of:?}");

        Ok(Expr {
            expr: expr.to_string(),
            type_name,
            storage,
            address_of,
        })
    }

    fn read_memory(&mut self, addr: u64, len: u64) -> Result<Vec<u8>> {
        let response = self.execute(&format!("-data-read-memory-bytes {addr:#x} {len}"))?;
        let contents = field(&response.result, "contents")
            .ok_or_else(|| Error::from(format!("Cannot access memory at address {addr:#x}")))?;
        hex_bytes(&contents)
    }

    /// Ask GDB to quit.
    ///
    /// # Errors
    ///
    /// Returns an error if GDB cannot be waited for.
    pub fn exit(mut self) -> Result<()> {
        writeln!(self.stdin, "-gdb-exit")?;
        self.stdin.flush()?;
        self.child.wait()?;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

impl Target for Session {
    fn call(&mut self, function: &str, args: &[u64]) -> Result<Returned> {
        let value = self.evaluate(&remote::expression(function, args))?;
        Ok(parse_returned(&value))
    }

    fn read_c_string(&mut self, addr: u64, max: usize) -> Result<Vec<u8>> {
        remote::walk_c_string(addr, max, CHUNK, |cursor| self.read_memory(cursor, CHUNK))
    }
}

/// Storage of a non-pointer expression, from the address GDB reports for
/// its symbol (`load`) and the value of `&(expr)`.
fn storage_of(load: Option<u64>, address_of: Option<u64>) -> Storage {
    match (load, address_of) {
        (Some(addr), _) => Storage::Memory(addr),
        (None, Some(_)) => Storage::Memory(INVALID_ADDRESS),
        (None, None) => Storage::Register,
    }
}

/// Text of the console stream records (`~"..."`).
fn console(records: &[String]) -> String {
    records
        .iter()
        .filter_map(|r| r.strip_prefix("~\"").and_then(|r| r.strip_suffix('"')))
        .map(unescape)
        .collect()
}

/// Address in the output of `info address` for statically allocated
/// symbols.
fn static_address(text: &str) -> Option<u64> {
    Regex::new(r"at address 0x([0-9a-fA-F]+)")
        .ok()
        .and_then(|re| re.captures(text))
        .and_then(|c| u64::from_str_radix(&c[1], 16).ok())
}

/// Exit status carried by a `*stopped` record, if the program is gone.
fn exit_code(record: &str) -> Option<i32> {
    match field(record, "reason")?.as_str() {
        "exited-normally" => Some(0),
        "exited" => field(record, "exit-code").and_then(|c| i32::from_str_radix(&c, 8).ok()),
        "exited-signalled" => field(record, "signal-name")
            .and_then(|name| name.parse::<Signal>().ok())
            .map(|signal| signal as i32),
        _ => None,
    }
}

fn field(record: &str, name: &str) -> Option<String> {
    Regex::new(&format!(r#"(?:^|[,{{]){name}="((?:\\.|[^"\\])*)""#))
        .ok()
        .and_then(|re| re.captures(record).map(|c| unescape(&c[1])))
}

/// Undo C-style escaping, as found in MI strings and GDB's display of
/// `char *` values.
fn unescape(raw: &str) -> String {
    let mut bytes = Vec::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => bytes.push(b'\n'),
            Some('t') => bytes.push(b'\t'),
            Some('r') => bytes.push(b'\r'),
            Some('e') => bytes.push(0x1b),
            Some('a') => bytes.push(0x07),
            Some('b') => bytes.push(0x08),
            Some('f') => bytes.push(0x0c),
            Some('v') => bytes.push(0x0b),
            Some(d @ '0'..='7') => {
                let mut value = d.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(digit) => {
                            value = value * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                #[allow(clippy::cast_possible_truncation)]
                let byte = value as u8;
                bytes.push(byte);
            }
            Some(other) => {
                let mut buf = [0; 4];
                bytes.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
            None => bytes.push(b'\\'),
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn mi_escape(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len() + 2);
    out.push('"');
    for c in expr.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// First hexadecimal number in a GDB value display.
fn parse_hex(value: &str) -> Option<u64> {
    Regex::new(r"0x([0-9a-fA-F]+)")
        .ok()
        .and_then(|re| re.captures(value))
        .and_then(|c| u64::from_str_radix(&c[1], 16).ok())
}

fn hex_bytes(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return Err(Error::from(format!("odd-length memory contents: {hex}")));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(Error::from))
        .collect()
}

/// Split the display of a returned `char *` into pointer and text.
fn parse_returned(value: &str) -> Returned {
    let summary = Regex::new(r#"^(0x[0-9a-fA-F]+)(?: <[^>]*>)? "((?:\\.|[^"\\])*)"(?:\.\.\.)?$"#)
        .ok()
        .and_then(|re| re.captures(value).map(|c| unescape(&c[2])));

    Returned {
        pointer: parse_hex(value).unwrap_or(0),
        summary,
    }
}

fn type_tag(type_name: &str) -> &str {
    ["struct ", "union ", "enum "]
        .iter()
        .find_map(|keyword| type_name.strip_prefix(keyword))
        .unwrap_or(type_name)
}

fn is_pointer_type(type_name: &str) -> bool {
    type_name.ends_with('*')
        || type_name.starts_with("*mut ")
        || type_name.starts_with("*const ")
        || type_name.starts_with('&')
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::value::{self, Address};

    #[test]
    fn test_field() {
        let record = r#"^done,name="var1",numchild="2",value="{...}",type="struct point",thread-id="1",has_more="0""#;
        assert_eq!(field(record, "name").as_deref(), Some("var1"));
        assert_eq!(field(record, "type").as_deref(), Some("struct point"));
        assert_eq!(field(record, "id"), None);
        assert_eq!(field(record, "thread-id").as_deref(), Some("1"));
    }

    #[test]
    fn test_field_escaped() {
        let record = r#"^done,value="0x4052a0 \"point(3, 4)\"""#;
        assert_eq!(
            field(record, "value").as_deref(),
            Some(r#"0x4052a0 "point(3, 4)""#)
        );
    }

    #[test]
    fn test_response_error() {
        let response = Response {
            result: r#"^error,msg="No symbol \"nope\" in current context.""#.to_string(),
            records: Vec::new(),
        };
        assert_eq!(
            response.error().as_deref(),
            Some(r#"No symbol "nope" in current context."#)
        );

        let response = Response {
            result: "^done".to_string(),
            records: Vec::new(),
        };
        assert!(response.error().is_none());
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(r"a\nb\tc"), "a\nb\tc");
        assert_eq!(unescape(r#"\"q\" \\"#), r#""q" \"#);
        assert_eq!(unescape(r"\303\251t\303\251"), "été");
        assert_eq!(unescape(r"\0"), "\0");
    }

    #[test]
    fn test_mi_escape() {
        assert_eq!(mi_escape(r#"f("x")"#), r#""f(\"x\")""#);
        assert_eq!(mi_escape(r"a\b"), r#""a\\b""#);
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("0x404028 <origin>"), Some(0x40_4028));
        assert_eq!(parse_hex("(struct point *) 0x7ffe10"), Some(0x7f_fe10));
        assert_eq!(parse_hex("{x = 1, y = 2}"), None);
    }

    #[test]
    fn test_hex_bytes() {
        assert_eq!(hex_bytes("706f00").expect("hex"), vec![0x70, 0x6f, 0x00]);
        assert!(hex_bytes("706").is_err());
        assert!(hex_bytes("zz").is_err());
    }

    #[test]
    fn test_parse_returned() {
        let returned = parse_returned(r#"0x4052a0 "point(3, 4)""#);
        assert_eq!(returned.pointer, 0x40_52a0);
        assert_eq!(returned.summary.as_deref(), Some("point(3, 4)"));

        let returned = parse_returned(r#"0x4052a0 "a\"b"..."#);
        assert_eq!(returned.summary.as_deref(), Some(r#"a"b"#));

        let returned = parse_returned(r#"0x4052c0 """#);
        assert_eq!(returned.summary.as_deref(), Some(""));

        assert_eq!(parse_returned("0x0"), Returned::pointer(0));
        assert_eq!(parse_returned("4210848"), Returned::pointer(0));
    }

    #[test]
    fn test_type_tag() {
        assert_eq!(type_tag("struct point"), "point");
        assert_eq!(type_tag("union u"), "u");
        assert_eq!(type_tag("enum e"), "e");
        assert_eq!(type_tag("bytes::bytes::Bytes"), "bytes::bytes::Bytes");
    }

    #[test]
    fn test_is_pointer_type() {
        assert!(is_pointer_type("struct point *"));
        assert!(is_pointer_type("*mut u8"));
        assert!(is_pointer_type("*const bytes::bytes::Bytes"));
        assert!(is_pointer_type("&bytes::bytes::Bytes"));
        assert!(!is_pointer_type("struct point"));
        assert!(!is_pointer_type("int"));
    }

    fn expr(storage: Storage, address_of: Option<u64>) -> Expr {
        Expr {
            expr: "*cursor".to_string(),
            type_name: "point".to_string(),
            storage,
            address_of,
        }
    }

    #[test]
    fn test_storage_of() {
        assert_eq!(
            storage_of(Some(0x40_4028), Some(0x40_4028)),
            Storage::Memory(0x40_4028)
        );
        assert_eq!(
            storage_of(None, Some(0x40_4028)),
            Storage::Memory(INVALID_ADDRESS)
        );
        assert_eq!(storage_of(None, None), Storage::Register);
    }

    #[test]
    fn test_expr_resolves_through_address_of() {
        let e = expr(storage_of(None, Some(0x40_4028)), Some(0x40_4028));
        assert_eq!(e.expr(), "*cursor");
        assert_eq!(value::resolve(&e), Address::Resolved(0x40_4028));

        let e = expr(storage_of(Some(0x40_4030), Some(0x40_4028)), Some(0x40_4028));
        assert_eq!(value::resolve(&e), Address::Resolved(0x40_4030));

        let e = expr(storage_of(None, None), None);
        assert_eq!(
            value::resolve(&e),
            Address::Unresolvable {
                attempted: INVALID_ADDRESS
            }
        );
    }

    #[test]
    fn test_console_and_static_address() {
        let records = vec![
            r#"&"info address origin\n""#.to_string(),
            r#"~"Symbol \"origin\" is static storage at address 0x404028.\n""#.to_string(),
        ];
        let text = console(&records);
        assert_eq!(text, "Symbol \"origin\" is static storage at address 0x404028.\n");
        assert_eq!(static_address(&text), Some(0x40_4028));

        assert_eq!(
            static_address("Symbol \"p\" is a variable at frame base reg $rbp offset 16+-24."),
            None
        );
        assert_eq!(static_address("Symbol \"x\" is a variable in $rdi."), None);
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(exit_code(r#"*stopped,reason="exited-normally""#), Some(0));
        assert_eq!(
            exit_code(r#"*stopped,reason="exited",exit-code="012""#),
            Some(10)
        );
        assert_eq!(
            exit_code(r#"*stopped,reason="exited-signalled",signal-name="SIGSEGV",signal-meaning="Segmentation fault""#),
            Some(Signal::SIGSEGV as i32)
        );
        assert_eq!(
            exit_code(r#"*stopped,reason="breakpoint-hit",disp="keep",bkptno="1""#),
            None
        );
    }
}
