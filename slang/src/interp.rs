/// Tree-walking interpreter over [`Code`].
///
/// Each instruction reads and writes the slots of the running node's
/// frame. A `Return` unwinds every nested block up to the node.
use log::debug;

use crate::{
    code::{CallFlags, Code, Instr, Opcode, Operand, Params},
    error::RuntimeError,
    eval::{evaluate, is_true, Bindings},
    runtime::Runtime,
    text::{format_template, set_byte, split, substring, Delimiter},
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Next,
    Return,
}

pub fn run_code(
    rt: &mut Runtime,
    code: &Code,
    frame: &mut [Value],
    params: &Params,
    returns: &mut [Value],
) -> Result<Flow, RuntimeError> {
    Exec {
        rt,
        frame,
        params,
        returns,
    }
    .run(code)
}

/// Expression variables read the frame: a declared parameter yields its
/// string, or nothing if it holds a table or null.
struct FrameBindings<'a> {
    frame: &'a [Value],
    params: &'a Params,
}

impl Bindings for FrameBindings<'_> {
    fn value_of(&self, name: &str) -> Option<Vec<u8>> {
        let slot = self.params.index_of(name)?;
        let value = self.frame.get(slot)?;
        Some(value.as_bytes().map(<[u8]>::to_vec).unwrap_or_default())
    }
}

struct Exec<'a> {
    rt: &'a mut Runtime,
    frame: &'a mut [Value],
    params: &'a Params,
    returns: &'a mut [Value],
}

impl Exec<'_> {
    fn run(&mut self, code: &Code) -> Result<Flow, RuntimeError> {
        for instr in code.instrs() {
            let flow = match instr.op {
                Opcode::Noop | Opcode::End => Flow::Next,
                Opcode::Assign => self.assign(instr)?,
                Opcode::Evaluate => self.evaluate(instr)?,
                Opcode::Format => self.format(instr)?,
                Opcode::If => self.branch(instr)?,
                Opcode::While => self.repeat(instr)?,
                Opcode::Return => self.ret(instr),
                Opcode::Call => self.call(instr)?,
                Opcode::ItemCount => self.item_count(instr)?,
                Opcode::GetItem => self.get_item(instr)?,
                Opcode::SetItem => self.set_item(instr)?,
                Opcode::Foreach => self.foreach(instr)?,
            };
            if flow == Flow::Return {
                return Ok(Flow::Return);
            }
        }
        Ok(Flow::Next)
    }

    fn bindings(&self) -> FrameBindings<'_> {
        FrameBindings {
            frame: &*self.frame,
            params: self.params,
        }
    }

    fn slot(&self, operand: Option<&Operand>, op: &'static str) -> Result<usize, RuntimeError> {
        match operand {
            Some(&Operand::Variable(slot)) if slot < self.frame.len() => Ok(slot),
            _ => Err(RuntimeError::BadOperand(op)),
        }
    }

    /// String content of a variable or constant operand.
    fn text(&self, operand: &Operand) -> Option<Vec<u8>> {
        match operand {
            Operand::Variable(slot) => self.frame.get(*slot)?.as_bytes().map(<[u8]>::to_vec),
            Operand::Const(text) => Some(text.clone()),
            _ => None,
        }
    }

    fn value(&self, operand: &Operand, op: &'static str) -> Result<Value, RuntimeError> {
        match operand {
            Operand::Variable(slot) => self
                .frame
                .get(*slot)
                .cloned()
                .ok_or(RuntimeError::BadOperand(op)),
            Operand::Const(text) => Ok(Value::str(text.clone())),
            Operand::Init => Ok(Value::Null),
            _ => Err(RuntimeError::BadOperand(op)),
        }
    }

    fn code<'c>(operand: Option<&'c Operand>, op: &'static str) -> Result<&'c Code, RuntimeError> {
        match operand {
            Some(Operand::Code(code)) => Ok(code),
            _ => Err(RuntimeError::BadOperand(op)),
        }
    }

    /// A condition holds when its result starts with `1`. Non-string
    /// variables never hold.
    fn holds(&self, cond: &Operand) -> bool {
        let bindings = self.bindings();
        let result = match cond {
            Operand::Eval(expr) => expr.run(&bindings),
            Operand::Variable(_) | Operand::Const(_) => match self.text(cond) {
                Some(text) => evaluate(&text, &bindings),
                None => return false,
            },
            _ => return false,
        };
        is_true(&result)
    }

    // ═══════════════════════════════════════════════════════════════
    // Assignment
    // ═══════════════════════════════════════════════════════════════

    fn assign(&mut self, instr: &Instr) -> Result<Flow, RuntimeError> {
        let ops = instr.operands();
        let dest = self.slot(ops.first(), "Assign")?;
        let src = ops.get(1).ok_or(RuntimeError::BadOperand("Assign"))?;
        if *src == Operand::Variable(dest) {
            return Ok(Flow::Next);
        }
        self.frame[dest] = self.value(src, "Assign")?;
        Ok(Flow::Next)
    }

    fn evaluate(&mut self, instr: &Instr) -> Result<Flow, RuntimeError> {
        let ops = instr.operands();
        let dest = self.slot(ops.first(), "Evaluate")?;
        let bindings = self.bindings();
        let result = match ops.get(1) {
            Some(Operand::Eval(expr)) => expr.run(&bindings),
            Some(operand @ (Operand::Variable(_) | Operand::Const(_))) => {
                let text = self.text(operand).ok_or(RuntimeError::BadOperand("Evaluate"))?;
                evaluate(&text, &bindings)
            }
            _ => return Err(RuntimeError::BadOperand("Evaluate")),
        };
        self.frame[dest] = Value::str(result);
        Ok(Flow::Next)
    }

    fn format(&mut self, instr: &Instr) -> Result<Flow, RuntimeError> {
        let ops = instr.operands();
        let dest = self.slot(ops.first(), "Format")?;
        let template = ops
            .get(1)
            .and_then(|op| self.text(op))
            .ok_or(RuntimeError::BadOperand("Format"))?;
        let text = format_template(&template, &self.bindings());
        self.frame[dest] = Value::str(text);
        Ok(Flow::Next)
    }

    // ═══════════════════════════════════════════════════════════════
    // Control flow
    // ═══════════════════════════════════════════════════════════════

    /// Operands are `cond, code` pairs, optionally ending in a bare code
    /// block for the default arm.
    fn branch(&mut self, instr: &Instr) -> Result<Flow, RuntimeError> {
        let ops = instr.operands();
        let mut i = 0;
        while i < ops.len() {
            if let Operand::Code(code) = &ops[i] {
                return self.run(code);
            }
            let code = Self::code(ops.get(i + 1), "If")?;
            if self.holds(&ops[i]) {
                return self.run(code);
            }
            i += 2;
        }
        Ok(Flow::Next)
    }

    fn repeat(&mut self, instr: &Instr) -> Result<Flow, RuntimeError> {
        let ops = instr.operands();
        let cond = ops.first().ok_or(RuntimeError::BadOperand("While"))?;
        let code = Self::code(ops.get(1), "While")?;
        while self.holds(cond) {
            if self.run(code)? == Flow::Return {
                return Ok(Flow::Return);
            }
        }
        Ok(Flow::Next)
    }

    /// Extra values beyond the caller's return slots are dropped.
    fn ret(&mut self, instr: &Instr) -> Flow {
        for (i, operand) in instr.operands().iter().enumerate() {
            if i >= self.returns.len() {
                break;
            }
            let value = match operand {
                Operand::Variable(slot) => self.frame.get(*slot).cloned().unwrap_or_default(),
                Operand::Const(text) => Value::str(text.clone()),
                _ => Value::Null,
            };
            self.returns[i] = value;
        }
        Flow::Return
    }

    fn call(&mut self, instr: &Instr) -> Result<Flow, RuntimeError> {
        let ops = instr.operands();
        let name = match ops.first() {
            Some(Operand::Const(name)) => String::from_utf8_lossy(name).into_owned(),
            Some(Operand::Variable(slot)) => match self.frame.get(*slot).and_then(Value::as_bytes) {
                Some(name) => String::from_utf8_lossy(name).into_owned(),
                None => return Err(RuntimeError::BadOperand("Call")),
            },
            _ => return Err(RuntimeError::BadOperand("Call")),
        };
        let Some(&Operand::Flags(CallFlags {
            params,
            returns,
            is_async,
        })) = ops.get(1)
        else {
            return Err(RuntimeError::BadOperand("Call"));
        };
        let (arg_ops, ret_ops) = ops[2..]
            .split_at_checked(params)
            .filter(|(_, rest)| rest.len() == returns)
            .ok_or(RuntimeError::BadOperand("Call"))?;
        if is_async {
            debug!("call {name}: asynchronous call runs inline");
        }

        let args = arg_ops
            .iter()
            .map(|op| self.value(op, "Call"))
            .collect::<Result<Vec<_>, _>>()?;
        let mut results = vec![Value::Null; returns];
        self.rt.call_node(&name, &args, &mut results)?;

        for (operand, value) in ret_ops.iter().zip(results) {
            if let Operand::Variable(slot) = operand {
                if let Some(dest) = self.frame.get_mut(*slot) {
                    *dest = value;
                }
            }
        }
        Ok(Flow::Next)
    }

    // ═══════════════════════════════════════════════════════════════
    // Items
    // ═══════════════════════════════════════════════════════════════

    fn item_count(&mut self, instr: &Instr) -> Result<Flow, RuntimeError> {
        let ops = instr.operands();
        let dest = self.slot(ops.first(), "ItemCount")?;
        let count = match ops.get(1) {
            Some(Operand::Variable(slot)) => match self.frame.get(*slot) {
                Some(Value::Table(table)) => table.len(),
                Some(Value::Str(s)) => s.bytes().len(),
                _ => 0,
            },
            Some(Operand::Const(text)) => text.len(),
            _ => return Err(RuntimeError::BadOperand("ItemCount")),
        };
        self.frame[dest] = Value::str(count.to_string());
        Ok(Flow::Next)
    }

    fn get_item(&mut self, instr: &Instr) -> Result<Flow, RuntimeError> {
        let ops = instr.operands();
        let dest = self.slot(ops.first(), "GetItem")?;
        let src = ops.get(1).ok_or(RuntimeError::BadOperand("GetItem"))?;
        let key = ops
            .get(2)
            .and_then(|op| self.text(op))
            .ok_or(RuntimeError::BadOperand("GetItem"))?;
        let source = match src {
            Operand::Variable(slot) => self.frame.get(*slot).cloned().unwrap_or_default(),
            Operand::Const(text) => Value::str(text.clone()),
            _ => return Err(RuntimeError::BadOperand("GetItem")),
        };
        let value = match &source {
            Value::Table(table) => self.rt.store().query_item(table, &key)?,
            Value::Str(s) => substring(s.bytes(), &key).map_or(Value::Null, Value::str),
            Value::Null => Value::Null,
        };
        self.frame[dest] = value;
        Ok(Flow::Next)
    }

    /// `dest[key = value]`. A string destination gets byte replacement, a
    /// table gets an upsert; `*` deletes the key.
    fn set_item(&mut self, instr: &Instr) -> Result<Flow, RuntimeError> {
        let ops = instr.operands();
        let dest = self.slot(ops.first(), "SetItem")?;
        let value_op = ops.get(2).ok_or(RuntimeError::BadOperand("SetItem"))?;
        let Some(key) = ops.get(1).and_then(|op| self.text(op)) else {
            return Ok(Flow::Next);
        };
        if self.frame[dest].is_null() {
            self.frame[dest] = Value::table();
        }

        match self.frame[dest].clone() {
            Value::Str(s) => {
                let replacement = match value_op {
                    Operand::Init => Vec::new(),
                    op => self.text(op).ok_or(RuntimeError::BadOperand("SetItem"))?,
                };
                if let Some(updated) = set_byte(s.bytes(), &key, &replacement) {
                    self.frame[dest] = Value::str(updated);
                }
            }
            Value::Table(table) => {
                let value = self.value(value_op, "SetItem")?;
                let unchanged = table.get(&key).is_some_and(|old| old.ptr_eq(&value));
                if !unchanged {
                    table.insert(key, value);
                }
            }
            Value::Null => {}
        }
        Ok(Flow::Next)
    }

    /// Operands: iterator, optional value, optional delimiter, source, body.
    fn foreach(&mut self, instr: &Instr) -> Result<Flow, RuntimeError> {
        let ops = instr.operands();
        let (body, head) = match ops.split_last() {
            Some((Operand::Code(body), head)) if head.len() >= 2 => (body, head),
            _ => return Err(RuntimeError::BadOperand("Foreach")),
        };
        let iter = self.slot(head.first(), "Foreach")?;
        let item = match head.len() {
            2 => None,
            _ => Some(self.slot(head.get(1), "Foreach")?),
        };
        let delimiter = match head.len() {
            4 => head
                .get(2)
                .and_then(|op| self.text(op))
                .map_or(Delimiter::Width(1), |delim| Delimiter::parse(&delim)),
            _ => Delimiter::Width(1),
        };
        let source = match head.last() {
            Some(Operand::Variable(slot)) => self.frame.get(*slot).cloned().unwrap_or_default(),
            Some(Operand::Const(text)) => Value::str(text.clone()),
            _ => return Err(RuntimeError::BadOperand("Foreach")),
        };

        match source {
            Value::Str(s) => {
                let text = s.bytes().to_vec();
                drop(s);
                for piece in split(&text, &delimiter) {
                    self.frame[iter] = Value::str(piece.iter.to_string());
                    if let Some(item) = item {
                        self.frame[item] = Value::str(&text[piece.range]);
                    }
                    if self.run(body)? == Flow::Return {
                        return Ok(Flow::Return);
                    }
                }
            }
            Value::Table(table) => {
                for key in table.keys().into_iter().step_by(delimiter.step()) {
                    if !table.contains(&key) {
                        continue;
                    }
                    let value = self.rt.store().query_item(&table, &key)?;
                    self.frame[iter] = Value::str(key);
                    if let Some(item) = item {
                        self.frame[item] = value;
                    }
                    if self.run(body)? == Flow::Return {
                        return Ok(Flow::Return);
                    }
                }
            }
            Value::Null => {}
        }
        Ok(Flow::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeSettings;

    fn call(source: &str, node: &str, args: &[&str]) -> Value {
        let mut rt = Runtime::new(RuntimeSettings::in_memory()).unwrap();
        rt.load_module_source("t", source.as_bytes()).unwrap();
        let args: Vec<Value> = args.iter().map(|a| Value::str(*a)).collect();
        let mut returns = [Value::Null];
        rt.call_node(&format!(".t.{node}"), &args, &mut returns)
            .unwrap();
        let [value] = returns;
        value
    }

    fn text(value: &Value) -> String {
        String::from_utf8(value.as_bytes().expect("string value").to_vec()).unwrap()
    }

    #[test]
    fn test_foreach_words() {
        let src = r#".Words(s)(out, i, w) {
            out = "";
            i, w, "*" @ s { out = [ "{out}{i}{w}" ]; }
            <out>
        }"#;
        assert_eq!(text(&call(src, "Words", &["a b c"])), "1a2b3c");
    }

    #[test]
    fn test_foreach_default_width() {
        let src = r#".Chars(s)(out, i, c) {
            out = "";
            i, c @ s { out = [ "{out}{c}." ]; }
            <out>
        }"#;
        assert_eq!(text(&call(src, "Chars", &["ab"])), "a.b.");
    }

    #[test]
    fn test_foreach_table_step() {
        let src = r#".Every()(t, out, k, v) {
            t["a" = "1"]; t["b" = "2"]; t["c" = "3"]; t["d" = "4"];
            out = "";
            k, v, "2" @ t { out = [ "{out}{k}{v}" ]; }
            <out>
        }"#;
        assert_eq!(text(&call(src, "Every", &[])), "a1c3");
    }

    #[test]
    fn test_return_inside_foreach() {
        let src = r#".First(s)(i, w) {
            i, w, "," @ s { <w> }
            <"none">
        }"#;
        assert_eq!(text(&call(src, "First", &["x,y"])), "x");
    }

    #[test]
    fn test_if_chain() {
        let src = r#".Sign(n) {
            ? "n < 0" { <"neg"> }
            ~ "n == 0" { <"zero"> }
            ~ { <"pos"> }
        }"#;
        assert_eq!(text(&call(src, "Sign", &["-4"])), "neg");
        assert_eq!(text(&call(src, "Sign", &["0"])), "zero");
        assert_eq!(text(&call(src, "Sign", &["7"])), "pos");
    }

    #[test]
    fn test_while_loop() {
        let src = r#".Up(n)(i) {
            i = "0";
            @ "i < n" { i = ?"i + 1"; }
            <i>
        }"#;
        assert_eq!(text(&call(src, "Up", &["3"])), "3");
    }

    #[test]
    fn test_substring_and_count() {
        let src = r#".Sub(s, k)(r) { r = s[k]; <r> }
            .Len(s)(n) { n = #s; <n> }"#;
        assert_eq!(text(&call(src, "Sub", &["hello", "2~4"])), "ell");
        assert!(call(src, "Sub", &["hello", "4~2"]).is_null());
        assert_eq!(text(&call(src, "Len", &["hello"])), "5");
    }

    #[test]
    fn test_set_item_on_string() {
        let src = r#".Patch(s) { s["2" = "X"]; s["9" = "!"]; <s> }"#;
        assert_eq!(text(&call(src, "Patch", &["abc"])), "aXc!");
    }

    #[test]
    fn test_table_delete_and_count() {
        let src = r#".Del()(t, n) {
            t["a" = "1"]; t["b" = "2"]; t["a" = *];
            n = #t;
            <n>
        }"#;
        assert_eq!(text(&call(src, "Del", &[])), "1");
    }

    #[test]
    fn test_format_non_string_is_empty() {
        let src = r#".Fmt()(t, r) { t["k" = "v"]; r = [ "<{t}>{missing}" ]; <r> }"#;
        assert_eq!(text(&call(src, "Fmt", &[])), "<>{missing}");
    }

    #[test]
    fn test_evaluate_table_fails_call() {
        let mut rt = Runtime::new(RuntimeSettings::in_memory()).unwrap();
        rt.load_module_source("t", br#".Bad()(t, r){ t["a" = "1"]; r = ?t; <r> }"#)
            .unwrap();
        let err = rt.call_node(".t.Bad", &[], &mut [Value::Null]).unwrap_err();
        match err {
            RuntimeError::CallFailed { source, .. } => {
                assert!(matches!(*source, RuntimeError::BadOperand("Evaluate")))
            }
            _ => panic!("Expected CallFailed"),
        }
    }

    #[test]
    fn test_call_by_variable_and_discarded_returns() {
        let src = r#".Pair()(a) { <"1", "2"> }
            .Use()(target, x) {
                target = ".Pair";
                ()>[target]>>(*, x);
                <x>
            }"#;
        assert_eq!(text(&call(src, "Use", &[])), "2");
    }
}
