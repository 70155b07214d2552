//! Source-like textual dump of the IR

use crate::decl::{DeclId, DeclTable};
use crate::tree::{BlockOrigin, Class, Declaration, Expr, ExprKind, Function, IrFile, IrModule, Literal, Stmt, UnaryOp};

/// Render a whole module
pub fn print_module(module: &IrModule, decls: &DeclTable) -> String {
    let mut printer = Printer::new(decls);
    for file in &module.files {
        printer.file(file);
    }
    printer.out
}

/// Render one file
pub fn print_file(file: &IrFile, decls: &DeclTable) -> String {
    let mut printer = Printer::new(decls);
    printer.file(file);
    printer.out
}

/// Render one function
pub fn print_function(function: &Function, decls: &DeclTable) -> String {
    let mut printer = Printer::new(decls);
    printer.function(function);
    printer.newline();
    printer.out
}

/// Render one expression
pub fn print_expr(expr: &Expr, decls: &DeclTable) -> String {
    let mut printer = Printer::new(decls);
    printer.expr(expr);
    printer.out
}

struct Printer<'decls> {
    decls: &'decls DeclTable,
    out: String,
    indent: usize,
}

impl<'decls> Printer<'decls> {
    fn new(decls: &'decls DeclTable) -> Self {
        Self {
            decls,
            out: String::new(),
            indent: 0,
        }
    }

    fn name(&self, decl: DeclId) -> String {
        self.decls.name(decl)
    }

    fn push(&mut self, text: &str) {
        self.out.push_str(text);
    }

    fn newline(&mut self) {
        self.out.push('\n');
    }

    fn pad(&mut self) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
    }

    fn file(&mut self, file: &IrFile) {
        self.push(&format!("// file {}\n", file.name));
        for declaration in &file.declarations {
            self.declaration(declaration);
            self.newline();
        }
    }

    fn declaration(&mut self, declaration: &Declaration) {
        self.pad();
        match declaration {
            Declaration::Function(function) => self.function(function),
            Declaration::Class(class) => self.class(class),
            Declaration::Field(field) => {
                let ty = self.value_type(field.decl);
                self.push(&format!("field {}: {ty}", self.name(field.decl)));
                if let Some(initializer) = &field.initializer {
                    self.push(" = ");
                    self.expr(initializer);
                }
            }
        }
    }

    fn value_type(&self, decl: DeclId) -> String {
        self.decls
            .value_type(decl)
            .map_or_else(|| "?".to_string(), |ty| ty.display(self.decls))
    }

    fn class(&mut self, class: &Class) {
        let descriptor = self.decls.get(class.decl);
        let keyword = if descriptor.modifiers.anonymous { "object" } else { "class" };
        self.push(&format!("{keyword} {}", self.name(class.decl)));
        if let Some(signature) = self.decls.class_signature(class.decl) {
            let supers: Vec<_> = signature
                .super_types
                .iter()
                .map(|ty| ty.display(self.decls))
                .collect();
            if !supers.is_empty() {
                self.push(&format!(" : {}", supers.join(", ")));
            }
        }
        self.push(" {");
        self.newline();
        self.indent += 1;
        for declaration in &class.declarations {
            self.declaration(declaration);
            self.newline();
        }
        self.indent -= 1;
        self.pad();
        self.push("}");
    }

    fn function(&mut self, function: &Function) {
        let descriptor = self.decls.get(function.decl);
        let modifiers = descriptor.modifiers;
        for (set, word) in [
            (modifiers.is_abstract, "abstract "),
            (modifiers.inline, "inline "),
            (modifiers.suspend, "suspend "),
        ] {
            if set {
                self.push(word);
            }
        }
        self.push("fun ");
        if let Some(receiver) = &function.extension_receiver {
            let ty = self.value_type(receiver.decl);
            self.push(&format!("{ty}."));
        }
        let params: Vec<_> = function
            .params
            .iter()
            .map(|param| format!("{}: {}", self.name(param.decl), self.value_type(param.decl)))
            .collect();
        let ret = self.decls.return_type(function.decl).display(self.decls);
        self.push(&format!("{}({}): {ret}", self.name(function.decl), params.join(", ")));
        if let Some(body) = &function.body {
            self.push(" ");
            self.statements(body);
        }
    }

    fn statements(&mut self, statements: &[Stmt]) {
        self.push("{");
        self.newline();
        self.indent += 1;
        for stmt in statements {
            self.pad();
            self.stmt(stmt);
            self.newline();
        }
        self.indent -= 1;
        self.pad();
        self.push("}");
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Variable(variable) => {
                let keyword = if self.decls.get(variable.decl).modifiers.mutable {
                    "var"
                } else {
                    "val"
                };
                let ty = self.value_type(variable.decl);
                self.push(&format!("{keyword} {}: {ty}", self.name(variable.decl)));
                if let Some(initializer) = &variable.initializer {
                    self.push(" = ");
                    self.expr(initializer);
                }
            }
            Stmt::Expr(expr) => self.expr(expr),
            Stmt::Function(function) => self.function(function),
            Stmt::Class(class) => self.class(class),
        }
    }

    fn receiver(&mut self, receiver: Option<&Expr>) {
        if let Some(receiver) = receiver {
            self.operand(receiver);
            self.push(".");
        }
    }

    fn operand(&mut self, expr: &Expr) {
        if matches!(expr.kind, ExprKind::Binary { .. }) {
            self.push("(");
            self.expr(expr);
            self.push(")");
        } else {
            self.expr(expr);
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Const(literal) => match literal {
                Literal::Unit => self.push("Unit"),
                Literal::Null => self.push("null"),
                Literal::Bool(value) => {
                    self.push(&format!("{value}"));
                }
                Literal::Int(value) => {
                    self.push(&format!("{value}"));
                }
                Literal::Float(value) => {
                    self.push(&format!("{value:?}"));
                }
                Literal::String(value) => {
                    self.push(&format!("{value:?}"));
                }
            },
            ExprKind::GetValue(decl) => {
                let name = self.name(*decl);
                self.push(&name);
            }
            ExprKind::SetValue { target, value } => {
                self.push(&format!("{} = ", self.name(*target)));
                self.expr(value);
            }
            ExprKind::GetField { receiver, field } => {
                self.receiver(receiver.as_deref());
                let name = self.name(*field);
                self.push(&name);
            }
            ExprKind::SetField {
                receiver,
                field,
                value,
            } => {
                self.receiver(receiver.as_deref());
                self.push(&format!("{} = ", self.name(*field)));
                self.expr(value);
            }
            ExprKind::Call(call) => {
                self.receiver(call.dispatch_receiver.as_ref());
                self.receiver(call.extension_receiver.as_ref());
                let name = self.name(call.callee);
                self.push(&name);
                if !call.type_args.is_empty() {
                    let args: Vec<_> = call.type_args.iter().map(|ty| ty.display(self.decls)).collect();
                    self.push(&format!("<{}>", args.join(", ")));
                }
                self.push("(");
                for (index, arg) in call.args.iter().enumerate() {
                    if index > 0 {
                        self.push(", ");
                    }
                    match arg {
                        Some(arg) => self.expr(arg),
                        None => self.push("_"),
                    }
                }
                self.push(")");
            }
            ExprKind::Invoke { callee, args } => {
                self.operand(callee);
                self.push("(");
                for (index, arg) in args.iter().enumerate() {
                    if index > 0 {
                        self.push(", ");
                    }
                    self.expr(arg);
                }
                self.push(")");
            }
            ExprKind::Lambda(function) => {
                self.push("lambda ");
                self.function(function);
            }
            ExprKind::FunctionReference {
                target,
                dispatch_receiver,
                extension_receiver,
            } => {
                if let Some(receiver) = dispatch_receiver.as_deref().or(extension_receiver.as_deref()) {
                    self.operand(receiver);
                }
                self.push(&format!("::{}", self.name(*target)));
            }
            ExprKind::Block { statements, origin } => {
                match origin {
                    BlockOrigin::Plain => {}
                    BlockOrigin::Transparent => self.push("composite "),
                    BlockOrigin::Temporaries => self.push("temporaries "),
                }
                self.statements(statements);
            }
            ExprKind::ReturnableBlock { target, statements, .. } => {
                self.push(&format!("{}@ ", self.name(*target)));
                self.statements(statements);
            }
            ExprKind::Return { target, value } => {
                self.push(&format!("return@{} ", self.name(*target)));
                self.expr(value);
            }
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.push("if (");
                self.expr(condition);
                self.push(") ");
                self.expr(then_branch);
                if let Some(else_branch) = else_branch {
                    self.push(" else ");
                    self.expr(else_branch);
                }
            }
            ExprKind::While { condition, body } => {
                self.push("while (");
                self.expr(condition);
                self.push(") ");
                self.expr(body);
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.operand(lhs);
                self.push(&format!(" {} ", op.symbol()));
                self.operand(rhs);
            }
            ExprKind::Unary { op, operand } => {
                self.push(match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Not => "!",
                });
                self.operand(operand);
            }
            ExprKind::Throw(value) => {
                self.push("throw ");
                self.expr(value);
            }
            ExprKind::Vararg { elements, .. } => {
                self.push("vararg(");
                for (index, element) in elements.iter().enumerate() {
                    if index > 0 {
                        self.push(", ");
                    }
                    self.expr(element);
                }
                self.push(")");
            }
            ExprKind::Cast(value) => {
                self.operand(value);
                self.push(&format!(" as {}", expr.ty.display(self.decls)));
            }
            ExprKind::SuspendableExpression {
                suspension_point_id,
                result,
            } => {
                self.push("suspendable(");
                self.expr(suspension_point_id);
                self.push(") ");
                self.expr(result);
            }
            ExprKind::SuspensionPoint {
                id,
                point,
                result,
                resume_result,
            } => {
                self.push(&format!("suspensionPoint {}={point} ", self.name(*id)));
                self.expr(result);
                self.push(" resume ");
                self.expr(resume_result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IrBuilder;
    use crate::decl::Modifiers;
    use crate::tree::BinaryOp;
    use crate::ty::Type;
    use expect_test::expect;
    use kl_span::FileSpan;

    #[test]
    fn test_print_function() {
        let mut decls = DeclTable::new();
        let mut builder = IrBuilder::new(&mut decls, FileSpan::default());
        let mut function = builder.function("plus", None, &[("a", Type::Int)], Type::Int, Modifiers::default());
        let local = builder.variable("b", function.decl, Type::Int, false);
        let init = builder.int(2);
        let sum = builder.binary(BinaryOp::Add, builder.get(function.params[0].decl), builder.get(local));
        function.body = Some(vec![
            builder.declare_local(local, Some(init)),
            Stmt::Expr(builder.ret(function.decl, sum)),
        ]);
        expect![[r#"
            fun plus(a: Int): Int {
              val b: Int = 2
              return@plus a + b
            }
        "#]]
        .assert_eq(&print_function(&function, &decls));
    }
}
