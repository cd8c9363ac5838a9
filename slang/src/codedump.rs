/// `.sc` files: parsed nodes written out so a module can be loaded
/// without reparsing its source.
///
/// Everything is little-endian. Names occupy fixed 256-byte NUL-padded
/// fields. A fission node stores the name of the script node whose body
/// it shares instead of a code list, so that node must come first.
use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
    rc::Rc,
};

use log::debug;

use crate::{
    code::{CallFlags, Code, CodeBuilder, InstrBuilder, Node, NodeKind, Opcode, Operand, Params},
    eval::CompiledExpr,
    wire::{
        invalid_data, invalid_input, read_bytes, read_exact_vec, read_i32, read_len, write_bytes,
        write_i32, write_len,
    },
};

const NAME_FIELD: usize = 256;

const NODE_SCRIPT: i32 = 0;
const NODE_FISSION: i32 = 1;

const OPERAND_VARIABLE: i32 = 1;
const OPERAND_CONST: i32 = 2;
const OPERAND_CODE: i32 = 3;
const OPERAND_EVAL: i32 = 4;
const OPERAND_INIT: i32 = 5;

pub fn dump_file(path: &Path, nodes: &[Node]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    dump_nodes(&mut writer, nodes)?;
    writer.flush()?;
    debug!("wrote {} nodes to {}", nodes.len(), path.display());
    Ok(())
}

pub fn load_file(path: &Path) -> io::Result<Vec<Node>> {
    let mut reader = BufReader::new(File::open(path)?);
    let nodes = load_nodes(&mut reader)?;
    debug!("read {} nodes from {}", nodes.len(), path.display());
    Ok(nodes)
}

pub fn dump_nodes(w: &mut dyn Write, nodes: &[Node]) -> io::Result<()> {
    let dumped: Vec<&Node> = nodes
        .iter()
        .filter(|n| !matches!(n.kind, NodeKind::Native(_)))
        .collect();
    write_len(w, dumped.len())?;
    for (i, node) in dumped.iter().enumerate() {
        match node.kind {
            NodeKind::Script => write_i32(w, NODE_SCRIPT)?,
            _ => write_i32(w, NODE_FISSION)?,
        }
        write_name(w, &node.name)?;
        write_params(w, &node.params)?;
        match (node.kind, node.body()) {
            (NodeKind::Script, Some(body)) => write_code(w, body)?,
            (NodeKind::Script, None) => write_code(w, &Code::default())?,
            _ => {
                let owner = dumped[..i]
                    .iter()
                    .find(|n| matches!(n.kind, NodeKind::Script) && n.shares_body(node))
                    .ok_or_else(|| invalid_input("fission node without owner"))?;
                write_name(w, &owner.name)?;
            }
        }
    }
    Ok(())
}

pub fn load_nodes(r: &mut dyn Read) -> io::Result<Vec<Node>> {
    let count = read_len(r)?;
    let mut nodes: Vec<Node> = Vec::new();
    for _ in 0..count {
        let kind = read_i32(r)?;
        let name = read_name(r)?;
        let params = read_params(r)?;
        let node = match kind {
            NODE_SCRIPT => Node::script(name, params, read_code(r)?),
            NODE_FISSION => {
                let owner_name = read_name(r)?;
                let owner = nodes
                    .iter()
                    .find(|n| matches!(n.kind, NodeKind::Script) && n.name == owner_name)
                    .ok_or_else(|| invalid_data("fission target missing"))?;
                Node::fission(name, owner)
            }
            _ => return Err(invalid_data("unknown node type")),
        };
        nodes.push(node);
    }
    Ok(nodes)
}

fn write_name(w: &mut dyn Write, name: &str) -> io::Result<()> {
    let bytes = name.as_bytes();
    if bytes.len() >= NAME_FIELD {
        return Err(invalid_input("name longer than 255 bytes"));
    }
    let mut field = [0u8; NAME_FIELD];
    field[..bytes.len()].copy_from_slice(bytes);
    w.write_all(&field)
}

fn read_name(r: &mut dyn Read) -> io::Result<String> {
    let field = read_exact_vec(r, NAME_FIELD)?;
    let end = field.iter().position(|&b| b == 0).unwrap_or(NAME_FIELD);
    Ok(String::from_utf8_lossy(&field[..end]).into_owned())
}

fn write_params(w: &mut dyn Write, params: &Params) -> io::Result<()> {
    write_len(w, params.len())?;
    write_len(w, params.count1())?;
    write_len(w, params.count2())?;
    for name in params.names() {
        write_name(w, name)?;
    }
    Ok(())
}

fn read_params(r: &mut dyn Read) -> io::Result<Params> {
    let count = read_len(r)?;
    let count1 = read_len(r)?;
    let count2 = read_len(r)?;
    let mut names = Vec::new();
    for _ in 0..count {
        names.push(read_name(r)?);
    }
    Params::from_parts(names, count1, count2).ok_or_else(|| invalid_data("bad parameter block"))
}

fn write_code(w: &mut dyn Write, code: &Code) -> io::Result<()> {
    write_len(w, code.len())?;
    for instr in code.instrs() {
        write_i32(w, instr.op as i32)?;
        write_len(w, instr.operands().len())?;
        for operand in instr.operands() {
            write_operand(w, operand)?;
        }
    }
    Ok(())
}

fn write_operand(w: &mut dyn Write, operand: &Operand) -> io::Result<()> {
    match operand {
        Operand::Variable(slot) => {
            write_i32(w, OPERAND_VARIABLE)?;
            write_len(w, *slot)
        }
        Operand::Flags(flags) => {
            write_i32(w, OPERAND_VARIABLE)?;
            write_i32(w, flags.pack())
        }
        Operand::Const(text) => {
            write_i32(w, OPERAND_CONST)?;
            write_bytes(w, text)
        }
        Operand::Code(code) => {
            write_i32(w, OPERAND_CODE)?;
            write_code(w, code)
        }
        Operand::Eval(expr) => {
            write_i32(w, OPERAND_EVAL)?;
            write_bytes(w, &expr.source)
        }
        Operand::Init => write_i32(w, OPERAND_INIT),
    }
}

fn read_code(r: &mut dyn Read) -> io::Result<Code> {
    let count = read_len(r)?;
    let mut code = CodeBuilder::new();
    for _ in 0..count {
        let op = Opcode::from_i32(read_i32(r)?).ok_or_else(|| invalid_data("unknown opcode"))?;
        let operands = read_len(r)?;
        let mut instr = InstrBuilder::new(op);
        for i in 0..operands {
            let operand = match read_operand(r)? {
                // The packed counts of a call travel as a plain integer.
                Operand::Variable(v) if op == Opcode::Call && i == 1 => {
                    let packed = i32::try_from(v).map_err(|_| invalid_data("bad call flags"))?;
                    Operand::Flags(CallFlags::unpack(packed))
                }
                other => other,
            };
            instr.push(operand);
        }
        code.push(instr.finish());
    }
    Ok(code.finish())
}

fn read_operand(r: &mut dyn Read) -> io::Result<Operand> {
    Ok(match read_i32(r)? {
        OPERAND_VARIABLE => Operand::Variable(read_len(r)?),
        OPERAND_CONST => Operand::Const(read_bytes(r)?),
        OPERAND_CODE => Operand::Code(read_code(r)?),
        OPERAND_EVAL => {
            let source = read_bytes(r)?;
            let expr = CompiledExpr::compile(&source)
                .map_err(|err| invalid_data(&format!("bad expression: {err}")))?;
            Operand::Eval(Rc::new(expr))
        }
        OPERAND_INIT => Operand::Init,
        _ => return Err(invalid_data("unknown operand type")),
    })
}
