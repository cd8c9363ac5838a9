/// Parser turning `.sl` source into [`Node`]s.
///
/// A source buffer is a sequence of node definitions:
///
/// ```text
/// .name.alias (args)(pass)(state) { statements }
/// ```
///
/// Parsing stops at the first error; there is no recovery.
use std::{collections::HashSet, fs, path::Path, rc::Rc};

use crate::{
    code::{
        CallFlags, Code, CodeBuilder, Instr, InstrBuilder, MAX_CALL_OPERANDS, Node, Opcode,
        Operand, Params,
    },
    error::{ParseError, SourceError, SyntaxErrorKind},
    eval::CompiledExpr,
    lexer::{Clause, ClauseKind, Keyword, Lexer, Scan, Scope},
    span::Pos,
};

pub fn parse_source(src: &[u8]) -> Result<Vec<Node>, ParseError> {
    Parser::new(src).parse_nodes()
}

pub fn parse_source_file(path: &Path) -> Result<Vec<Node>, SourceError> {
    let src = fs::read(path).map_err(|source| SourceError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_source(&src).map_err(|error| SourceError::Parse {
        rendered: error.render(&path.display().to_string(), &src),
        error,
    })
}

struct Parser<'src> {
    lex: Lexer<'src>,
}

impl<'src> Parser<'src> {
    fn new(src: &'src [u8]) -> Self {
        Self {
            lex: Lexer::new(src),
        }
    }

    fn error(&self, kind: SyntaxErrorKind, offset: usize) -> ParseError {
        ParseError::new(kind, Pos::locate(self.lex.source(), offset))
    }

    /// Error for an unexpected clause. Error clauses keep their own kind.
    fn unexpected(&self, clause: &Clause, fallback: SyntaxErrorKind) -> ParseError {
        match clause.kind {
            ClauseKind::Error(kind) => self.error(kind, clause.start),
            ClauseKind::EndOfFile => self.error(SyntaxErrorKind::Syntax, clause.start),
            _ => self.error(fallback, clause.start),
        }
    }

    fn expect(&mut self, scope: &dyn Scope, kw: Keyword) -> Result<(), ParseError> {
        let clause = self.lex.next_clause(scope);
        if clause.kind == ClauseKind::Key(kw) {
            Ok(())
        } else {
            Err(self.unexpected(&clause, SyntaxErrorKind::Syntax))
        }
    }

    /// Consume `kw` if it is next.
    fn accept(&mut self, scope: &dyn Scope, kw: Keyword) -> bool {
        let save = self.lex.pos();
        if self.lex.next_clause(scope).kind == ClauseKind::Key(kw) {
            return true;
        }
        self.lex.reset(save);
        false
    }

    // ═══════════════════════════════════════════════════════════════
    // Node definitions
    // ═══════════════════════════════════════════════════════════════

    fn parse_nodes(&mut self) -> Result<Vec<Node>, ParseError> {
        let mut nodes = Vec::new();
        let mut names = HashSet::new();
        loop {
            self.lex.skip_blank();
            if self.lex.at_end() {
                return Ok(nodes);
            }
            let start = self.lex.pos();
            if self.lex.shift_keyword(Scan::Descending) != Some(Keyword::NodeDef) {
                return Err(self.error(SyntaxErrorKind::NodeDef, start));
            }
            let name_at = self.lex.pos();
            let name = self
                .lex
                .shift_name()
                .ok_or_else(|| self.error(SyntaxErrorKind::NodeName, name_at))?;
            let mut aliases = Vec::new();
            loop {
                let save = self.lex.pos();
                if self.lex.shift_keyword(Scan::Ascending) != Some(Keyword::NodeBegin) {
                    self.lex.reset(save);
                    break;
                }
                let at = self.lex.pos();
                let alias = self
                    .lex
                    .shift_name()
                    .ok_or_else(|| self.error(SyntaxErrorKind::NodeName, at))?;
                aliases.push((alias, at));
            }

            let params = self.parse_params()?;
            let body = self.parse_block(&params)?;

            if !names.insert(name.clone()) {
                return Err(self.error(SyntaxErrorKind::NameOccupied, name_at));
            }
            let node = Node::script(name, params, body);
            let mut fissions = Vec::with_capacity(aliases.len());
            for (alias, at) in aliases {
                if !names.insert(alias.clone()) {
                    return Err(self.error(SyntaxErrorKind::NameOccupied, at));
                }
                fissions.push(Node::fission(alias, &node));
            }
            nodes.push(node);
            nodes.extend(fissions);
        }
    }

    /// Parameter groups up to and including the `{` that opens the body.
    fn parse_params(&mut self) -> Result<Params, ParseError> {
        let mut params = Params::new();
        let mut group = 0;
        loop {
            self.lex.skip_blank();
            let at = self.lex.pos();
            if self.lex.at_end() {
                return Err(self.error(SyntaxErrorKind::NodeBody, at));
            }
            match self.lex.shift_keyword(Scan::Ascending) {
                Some(Keyword::ParenLeft) => group += 1,
                Some(Keyword::BraceLeft) if group > 0 => return Ok(params),
                _ if group == 0 => return Err(self.error(SyntaxErrorKind::NodeParam, at)),
                _ => return Err(self.error(SyntaxErrorKind::NodeBody, at)),
            }

            self.lex.skip_blank();
            let save = self.lex.pos();
            if self.lex.shift_keyword(Scan::Ascending) != Some(Keyword::ParenRight) {
                self.lex.reset(save);
                loop {
                    self.lex.skip_blank();
                    let at = self.lex.pos();
                    let name = self
                        .lex
                        .shift_name()
                        .ok_or_else(|| self.error(SyntaxErrorKind::NodeParam, at))?;
                    if !params.push(name) {
                        return Err(self.error(SyntaxErrorKind::NodeParam, at));
                    }
                    self.lex.skip_blank();
                    let at = self.lex.pos();
                    match self.lex.shift_keyword(Scan::Ascending) {
                        Some(Keyword::Comma) => continue,
                        Some(Keyword::ParenRight) => break,
                        _ => return Err(self.error(SyntaxErrorKind::NodeParam, at)),
                    }
                }
            }
            params.end_group(group);
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // Statements
    // ═══════════════════════════════════════════════════════════════

    /// Statements up to the closing `}`.
    fn parse_block(&mut self, scope: &Params) -> Result<Code, ParseError> {
        let mut code = CodeBuilder::new();
        loop {
            let clause = self.lex.next_clause(scope);
            match clause.kind {
                ClauseKind::Key(Keyword::BraceRight) => return Ok(code.finish()),
                ClauseKind::Key(Keyword::Semicolon) => {}
                ClauseKind::Variable(slot) => self.parse_var_statement(scope, slot, &mut code)?,
                ClauseKind::Key(Keyword::ParenLeft) => self.parse_call_chain(scope, &mut code)?,
                ClauseKind::Key(Keyword::AngleLeft) => code.push(self.parse_return(scope)?),
                ClauseKind::Key(Keyword::If) => code.push(self.parse_if(scope)?),
                ClauseKind::Key(Keyword::While) => code.push(self.parse_while(scope)?),
                _ => return Err(self.unexpected(&clause, SyntaxErrorKind::Syntax)),
            }
        }
    }

    /// A variable or a constant.
    fn atom(&mut self, scope: &dyn Scope) -> Result<Operand, ParseError> {
        let clause = self.lex.next_clause(scope);
        match clause.kind {
            ClauseKind::Variable(slot) => Ok(Operand::Variable(slot)),
            ClauseKind::Const(text) => Ok(Operand::Const(text)),
            _ => Err(self.unexpected(&clause, SyntaxErrorKind::Word)),
        }
    }

    /// A variable, a constant or `*`.
    fn value(&mut self, scope: &dyn Scope) -> Result<(Operand, Clause), ParseError> {
        let clause = self.lex.next_clause(scope);
        let operand = match &clause.kind {
            ClauseKind::Variable(slot) => Operand::Variable(*slot),
            ClauseKind::Const(text) => Operand::Const(text.clone()),
            ClauseKind::Key(Keyword::Asterisk) => Operand::Init,
            _ => return Err(self.unexpected(&clause, SyntaxErrorKind::Word)),
        };
        Ok((operand, clause))
    }

    /// Constant conditions are compiled once here.
    fn condition(operand: Operand) -> Operand {
        match &operand {
            Operand::Const(text) => match CompiledExpr::compile(text) {
                Ok(expr) => Operand::Eval(Rc::new(expr)),
                Err(_) => operand,
            },
            _ => operand,
        }
    }

    fn parse_var_statement(
        &mut self,
        scope: &Params,
        dest: usize,
        code: &mut CodeBuilder,
    ) -> Result<(), ParseError> {
        let clause = self.lex.next_clause(scope);
        match clause.kind {
            ClauseKind::Key(Keyword::Equal) => {
                let instr = self.parse_assignment(scope, dest)?;
                self.expect(scope, Keyword::Semicolon)?;
                code.push(instr.finish());
            }
            ClauseKind::Key(Keyword::BracketLeft) => {
                let key = self.atom(scope)?;
                self.expect(scope, Keyword::Equal)?;
                let (value, _) = self.value(scope)?;
                self.expect(scope, Keyword::BracketRight)?;
                self.expect(scope, Keyword::Semicolon)?;
                let mut instr = InstrBuilder::new(Opcode::SetItem);
                instr.push(Operand::Variable(dest)).push(key).push(value);
                code.push(instr.finish());
            }
            ClauseKind::Key(Keyword::Comma) => {
                let clause = self.lex.next_clause(scope);
                let ClauseKind::Variable(item) = clause.kind else {
                    return Err(self.unexpected(&clause, SyntaxErrorKind::Word));
                };
                let mut instr = InstrBuilder::new(Opcode::Foreach);
                instr.push(Operand::Variable(dest)).push(Operand::Variable(item));
                if self.accept(scope, Keyword::Comma) {
                    let delim = self.atom(scope)?;
                    instr.push(delim);
                }
                self.expect(scope, Keyword::While)?;
                code.push(self.finish_foreach(scope, instr)?);
            }
            ClauseKind::Key(Keyword::While) => {
                let mut instr = InstrBuilder::new(Opcode::Foreach);
                instr.push(Operand::Variable(dest));
                code.push(self.finish_foreach(scope, instr)?);
            }
            _ => return Err(self.unexpected(&clause, SyntaxErrorKind::Syntax)),
        }
        Ok(())
    }

    fn parse_assignment(
        &mut self,
        scope: &Params,
        dest: usize,
    ) -> Result<InstrBuilder, ParseError> {
        let rhs = self.lex.next_clause(scope);
        let (op, operands) = match rhs.kind {
            ClauseKind::Variable(src) => {
                if self.accept(scope, Keyword::BracketLeft) {
                    let key = self.atom(scope)?;
                    self.expect(scope, Keyword::BracketRight)?;
                    (Opcode::GetItem, vec![Operand::Variable(src), key])
                } else {
                    (Opcode::Assign, vec![Operand::Variable(src)])
                }
            }
            ClauseKind::Const(text) => (Opcode::Assign, vec![Operand::Const(text)]),
            ClauseKind::Key(Keyword::Asterisk) => (Opcode::Assign, vec![Operand::Init]),
            ClauseKind::Key(Keyword::If) => {
                let operand = self.atom(scope)?;
                (Opcode::Evaluate, vec![Self::condition(operand)])
            }
            ClauseKind::Key(Keyword::Count) => (Opcode::ItemCount, vec![self.atom(scope)?]),
            ClauseKind::Key(Keyword::BracketLeft) => {
                let template = self.atom(scope)?;
                self.expect(scope, Keyword::BracketRight)?;
                (Opcode::Format, vec![template])
            }
            _ => return Err(self.unexpected(&rhs, SyntaxErrorKind::Syntax)),
        };
        let mut instr = InstrBuilder::new(op);
        instr.push(Operand::Variable(dest));
        for operand in operands {
            instr.push(operand);
        }
        Ok(instr)
    }

    /// Source operand and body of a foreach whose `@` was consumed.
    fn finish_foreach(
        &mut self,
        scope: &Params,
        mut instr: InstrBuilder,
    ) -> Result<Instr, ParseError> {
        let src = self.atom(scope)?;
        self.expect(scope, Keyword::BraceLeft)?;
        let body = self.parse_block(scope)?;
        instr.push(src).push(Operand::Code(body));
        Ok(instr.finish())
    }

    fn parse_return(&mut self, scope: &Params) -> Result<Instr, ParseError> {
        let mut instr = InstrBuilder::new(Opcode::Return);
        loop {
            let clause = self.lex.next_clause(scope);
            match clause.kind {
                ClauseKind::Key(Keyword::AngleRight) => return Ok(instr.finish()),
                ClauseKind::Key(Keyword::Comma) => {}
                ClauseKind::Variable(slot) => {
                    instr.push(Operand::Variable(slot));
                }
                ClauseKind::Const(text) => {
                    instr.push(Operand::Const(text));
                }
                _ => return Err(self.unexpected(&clause, SyntaxErrorKind::Word)),
            }
        }
    }

    fn parse_if(&mut self, scope: &Params) -> Result<Instr, ParseError> {
        let mut instr = InstrBuilder::new(Opcode::If);
        let cond = self.atom(scope)?;
        self.expect(scope, Keyword::BraceLeft)?;
        instr
            .push(Self::condition(cond))
            .push(Operand::Code(self.parse_block(scope)?));
        while self.accept(scope, Keyword::Else) {
            let clause = self.lex.next_clause(scope);
            let cond = match clause.kind {
                ClauseKind::Key(Keyword::BraceLeft) => {
                    instr.push(Operand::Code(self.parse_block(scope)?));
                    break;
                }
                ClauseKind::Variable(slot) => Operand::Variable(slot),
                ClauseKind::Const(text) => Self::condition(Operand::Const(text)),
                _ => return Err(self.unexpected(&clause, SyntaxErrorKind::Word)),
            };
            self.expect(scope, Keyword::BraceLeft)?;
            instr.push(cond).push(Operand::Code(self.parse_block(scope)?));
        }
        Ok(instr.finish())
    }

    fn parse_while(&mut self, scope: &Params) -> Result<Instr, ParseError> {
        let cond = self.atom(scope)?;
        self.expect(scope, Keyword::BraceLeft)?;
        let mut instr = InstrBuilder::new(Opcode::While);
        instr
            .push(Self::condition(cond))
            .push(Operand::Code(self.parse_block(scope)?));
        Ok(instr.finish())
    }

    // ═══════════════════════════════════════════════════════════════
    // Calls
    // ═══════════════════════════════════════════════════════════════

    /// `(args)>target ...` with the `(` already consumed. A `>` after the
    /// return list chains into another call fed by those returns.
    fn parse_call_chain(
        &mut self,
        scope: &Params,
        code: &mut CodeBuilder,
    ) -> Result<(), ParseError> {
        let mut args = self.parse_call_list(scope, true)?;
        self.expect(scope, Keyword::AngleRight)?;
        loop {
            let (instr, returns, chained) = self.parse_call(scope, args)?;
            code.push(instr);
            if !chained {
                return Ok(());
            }
            args = returns;
        }
    }

    /// Operands up to `)`. Arguments accept constants, returns do not.
    fn parse_call_list(
        &mut self,
        scope: &Params,
        arguments: bool,
    ) -> Result<Vec<Operand>, ParseError> {
        let limit_error = if arguments {
            SyntaxErrorKind::ParamCount
        } else {
            SyntaxErrorKind::ReturnCount
        };
        let mut list = Vec::new();
        if self.accept(scope, Keyword::ParenRight) {
            return Ok(list);
        }
        loop {
            let (operand, clause) = self.value(scope)?;
            if !arguments && matches!(operand, Operand::Const(_)) {
                return Err(self.error(SyntaxErrorKind::Word, clause.start));
            }
            list.push(operand);
            if list.len() > MAX_CALL_OPERANDS {
                return Err(self.error(limit_error, clause.start));
            }
            let clause = self.lex.next_clause(scope);
            match clause.kind {
                ClauseKind::Key(Keyword::Comma) => {}
                ClauseKind::Key(Keyword::ParenRight) => return Ok(list),
                _ => return Err(self.unexpected(&clause, SyntaxErrorKind::Word)),
            }
        }
    }

    fn parse_call(
        &mut self,
        scope: &Params,
        args: Vec<Operand>,
    ) -> Result<(Instr, Vec<Operand>, bool), ParseError> {
        let clause = self.lex.next_clause(scope);
        let target = match clause.kind {
            ClauseKind::Node(name) => Operand::Const(name.into_bytes()),
            ClauseKind::Key(Keyword::BracketLeft) => {
                let clause = self.lex.next_clause(scope);
                let ClauseKind::Variable(slot) = clause.kind else {
                    return Err(self.unexpected(&clause, SyntaxErrorKind::Word));
                };
                self.expect(scope, Keyword::BracketRight)?;
                Operand::Variable(slot)
            }
            _ => return Err(self.unexpected(&clause, SyntaxErrorKind::Word)),
        };

        let mut returns = Vec::new();
        let mut is_async = false;
        let mut chained = false;
        let clause = self.lex.next_clause(scope);
        match clause.kind {
            ClauseKind::Key(Keyword::Semicolon) => {}
            ClauseKind::Key(Keyword::AngleRight) => {
                is_async = self.accept(scope, Keyword::AngleRight);
                self.expect(scope, Keyword::ParenLeft)?;
                returns = self.parse_call_list(scope, false)?;
                let clause = self.lex.next_clause(scope);
                match clause.kind {
                    ClauseKind::Key(Keyword::Semicolon) => {}
                    ClauseKind::Key(Keyword::AngleRight) => chained = true,
                    _ => return Err(self.unexpected(&clause, SyntaxErrorKind::Word)),
                }
            }
            _ => return Err(self.unexpected(&clause, SyntaxErrorKind::Word)),
        }

        let flags = CallFlags {
            params: args.len(),
            returns: returns.len(),
            is_async,
        };
        let mut instr = InstrBuilder::new(Opcode::Call);
        instr.push(target).push(Operand::Flags(flags));
        for operand in args.into_iter().chain(returns.iter().cloned()) {
            instr.push(operand);
        }
        Ok((instr.finish(), returns, chained))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::NodeKind;

    fn parse(src: &str) -> Vec<Node> {
        parse_source(src.as_bytes()).unwrap()
    }

    fn parse_err(src: &str) -> ParseError {
        match parse_source(src.as_bytes()) {
            Err(err) => err,
            Ok(nodes) => panic!("Expected parse error, got {} nodes", nodes.len()),
        }
    }

    fn body(node: &Node) -> &[Instr] {
        node.body().unwrap().instrs()
    }

    #[test]
    fn test_return_constant() {
        let nodes = parse(".A(){<\"1\">}");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "A");
        let instrs = body(&nodes[0]);
        assert_eq!(instrs[0].op, Opcode::Return);
        assert_eq!(instrs[0].operands(), &[Operand::Const(b"1".to_vec())]);
    }

    #[test]
    fn test_parameter_groups() {
        let nodes = parse(".C(a)(b)(c, d){}");
        let params = &nodes[0].params;
        assert_eq!(params.len(), 4);
        assert_eq!(params.count1(), 1);
        assert_eq!(params.count2(), 1);
        assert_eq!(params.state_range(), 2..4);
    }

    #[test]
    fn test_duplicate_parameter() {
        assert_eq!(parse_err(".C(a)(a){}").kind, SyntaxErrorKind::NodeParam);
    }

    #[test]
    fn test_fission_aliases_share_body() {
        let nodes = parse(".A.B.C(x){<x>}");
        assert_eq!(nodes.len(), 3);
        assert!(matches!(nodes[0].kind, NodeKind::Script));
        assert!(matches!(nodes[1].kind, NodeKind::Fission));
        assert_eq!(nodes[2].name, "C");
        assert!(nodes[2].shares_body(&nodes[0]));
    }

    #[test]
    fn test_duplicate_node_name() {
        let err = parse_err(".A(){}\n.A(){}");
        assert_eq!(err.kind, SyntaxErrorKind::NameOccupied);
        assert_eq!(err.pos.line, 2);
    }

    #[test]
    fn test_unclosed_string_position() {
        let err = parse_err(".A(x)\n{\n  x = \"abc;\n}");
        assert_eq!(err.kind.message(), "unclosed string");
        assert_eq!((err.pos.line, err.pos.column), (3, 7));
    }

    #[test]
    fn test_missing_define_token() {
        assert_eq!(parse_err("A(){}").kind, SyntaxErrorKind::NodeDef);
    }

    #[test]
    fn test_missing_body() {
        assert_eq!(parse_err(".A()").kind, SyntaxErrorKind::NodeBody);
        assert_eq!(parse_err(".A() x").kind, SyntaxErrorKind::NodeBody);
        assert_eq!(parse_err(".A{}").kind, SyntaxErrorKind::NodeParam);
    }

    #[test]
    fn test_eof_inside_block() {
        assert_eq!(parse_err(".A(){ <\"1\">").kind, SyntaxErrorKind::Syntax);
    }

    #[test]
    fn test_unknown_variable() {
        assert_eq!(parse_err(".A(x){ y = x; }").kind, SyntaxErrorKind::VariableName);
    }

    #[test]
    fn test_assignment_forms() {
        let nodes = parse(
            ".A(x, y){ x = y; x = \"c\"; x = *; x = y[\"k\"]; x = #y; x = [\"{y}\"]; x = ?\"1+2\"; }",
        );
        let ops: Vec<Opcode> = body(&nodes[0]).iter().map(|i| i.op).collect();
        assert_eq!(
            ops,
            vec![
                Opcode::Assign,
                Opcode::Assign,
                Opcode::Assign,
                Opcode::GetItem,
                Opcode::ItemCount,
                Opcode::Format,
                Opcode::Evaluate,
            ]
        );
        assert_eq!(body(&nodes[0])[2].operands()[1], Operand::Init);
        assert!(matches!(body(&nodes[0])[6].operands()[1], Operand::Eval(_)));
    }

    #[test]
    fn test_set_item() {
        let nodes = parse(".A(t){ t[\"k\"=*]; }");
        assert_eq!(
            body(&nodes[0])[0].operands(),
            &[
                Operand::Variable(0),
                Operand::Const(b"k".to_vec()),
                Operand::Init
            ]
        );
    }

    #[test]
    fn test_foreach_variants() {
        let nodes = parse(".A(i, v, s){ i@s{} i,v@s{} i,v,\"*\"@s{} }");
        let counts: Vec<usize> = body(&nodes[0]).iter().map(|i| i.operands().len()).collect();
        assert_eq!(counts, vec![3, 4, 5]);
        assert_eq!(body(&nodes[0])[2].operands()[2], Operand::Const(b"*".to_vec()));
    }

    #[test]
    fn test_if_chain_operands() {
        let nodes = parse(".A(x){ ?\"1\"{} ~ x {} ~ {} }");
        let operands = body(&nodes[0])[0].operands();
        assert_eq!(operands.len(), 5);
        assert!(matches!(operands[0], Operand::Eval(_)));
        assert_eq!(operands[2], Operand::Variable(0));
        assert!(matches!(operands[4], Operand::Code(_)));
    }

    #[test]
    fn test_bad_constant_condition_stays_constant() {
        let nodes = parse(".A(){ @\"1 +\"{} }");
        assert_eq!(body(&nodes[0])[0].operands()[0], Operand::Const(b"1 +".to_vec()));
    }

    #[test]
    fn test_call_with_returns() {
        let nodes = parse(".B()(x){ (\"a\", *)>.m.A>(x, *); }");
        let call = &body(&nodes[0])[0];
        assert_eq!(call.op, Opcode::Call);
        assert_eq!(
            call.operands(),
            &[
                Operand::Const(b".m.A".to_vec()),
                Operand::Flags(CallFlags {
                    params: 2,
                    returns: 2,
                    is_async: false
                }),
                Operand::Const(b"a".to_vec()),
                Operand::Init,
                Operand::Variable(0),
                Operand::Init,
            ]
        );
    }

    #[test]
    fn test_call_chain_reuses_returns() {
        let nodes = parse(".B()(x, y){ ()>.A>(x)>.C>(y); }");
        let instrs = body(&nodes[0]);
        assert_eq!(instrs.len(), 2);
        assert_eq!(
            instrs[1].operands(),
            &[
                Operand::Const(b".C".to_vec()),
                Operand::Flags(CallFlags {
                    params: 1,
                    returns: 1,
                    is_async: false
                }),
                Operand::Variable(0),
                Operand::Variable(1),
            ]
        );
    }

    #[test]
    fn test_async_marker_and_variable_target() {
        let nodes = parse(".B()(f, r){ (f)>[f]>>(r); }");
        match &body(&nodes[0])[0].operands()[..2] {
            [Operand::Variable(0), Operand::Flags(flags)] => assert!(flags.is_async),
            other => panic!("Expected variable target, got {other:?}"),
        }
    }

    #[test]
    fn test_constant_return_slot_rejected() {
        assert_eq!(parse_err(".B(){ ()>.A>(\"x\"); }").kind, SyntaxErrorKind::Word);
    }

    #[test]
    fn test_argument_limit() {
        let args = vec!["x"; 1001].join(",");
        let src = format!(".B(x){{ ({args})>.A; }}");
        assert_eq!(parse_err(&src).kind, SyntaxErrorKind::ParamCount);
    }

    #[test]
    fn test_return_limit() {
        let rets = vec!["x"; 1001].join(",");
        let src = format!(".B(x){{ ()>.A>({rets}); }}");
        assert_eq!(parse_err(&src).kind, SyntaxErrorKind::ReturnCount);
    }
}
