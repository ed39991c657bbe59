//! Type-annotation stripping.
//!
//! The bundle is plain JavaScript; every TypeScript-only artifact is
//! removed from declaration ASTs before codegen. Constructor parameter
//! properties are lowered to assignments so their runtime behavior
//! survives.

use deno_ast::swc::{
    ast::{
        AssignExpr, AssignOp, AssignTarget, Class, ClassMember, Constructor, Expr, ExprStmt,
        Function, Ident, IdentName, MemberExpr, MemberProp, Param, ParamOrTsParamProp, Pat,
        SimpleAssignTarget, Stmt, ThisExpr, TsParamPropParam,
    },
    common::{util::take::Take, SyntaxContext, DUMMY_SP},
    visit::{noop_visit_mut_type, VisitMut, VisitMutWith},
};

pub struct TypeStripper;

impl VisitMut for TypeStripper {
    noop_visit_mut_type!();

    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        while let Some(inner) = unwrap_ts_expr(expr) {
            *expr = inner;
        }
        expr.visit_mut_children_with(self);
    }

    fn visit_mut_call_expr(&mut self, call: &mut deno_ast::swc::ast::CallExpr) {
        call.type_args = None;
        call.visit_mut_children_with(self);
    }

    fn visit_mut_new_expr(&mut self, new_expr: &mut deno_ast::swc::ast::NewExpr) {
        new_expr.type_args = None;
        new_expr.visit_mut_children_with(self);
    }

    fn visit_mut_tagged_tpl(&mut self, tagged: &mut deno_ast::swc::ast::TaggedTpl) {
        tagged.type_params = None;
        tagged.visit_mut_children_with(self);
    }

    fn visit_mut_function(&mut self, function: &mut Function) {
        function.return_type = None;
        function.type_params = None;
        function.visit_mut_children_with(self);
    }

    fn visit_mut_arrow_expr(&mut self, arrow: &mut deno_ast::swc::ast::ArrowExpr) {
        arrow.return_type = None;
        arrow.type_params = None;
        arrow.visit_mut_children_with(self);
    }

    fn visit_mut_pat(&mut self, pat: &mut Pat) {
        match pat {
            Pat::Ident(binding) => binding.type_ann = None,
            Pat::Array(array) => array.type_ann = None,
            Pat::Object(object) => object.type_ann = None,
            Pat::Rest(rest) => rest.type_ann = None,
            _ => {}
        }
        pat.visit_mut_children_with(self);
    }

    fn visit_mut_var_declarator(&mut self, declarator: &mut deno_ast::swc::ast::VarDeclarator) {
        declarator.definite = false;
        declarator.visit_mut_children_with(self);
    }

    fn visit_mut_getter_prop(&mut self, getter: &mut deno_ast::swc::ast::GetterProp) {
        getter.type_ann = None;
        getter.visit_mut_children_with(self);
    }

    fn visit_mut_class(&mut self, class: &mut Class) {
        class.type_params = None;
        class.super_type_params = None;
        class.implements.clear();
        class.is_abstract = false;
        class.body.retain(|member| match member {
            ClassMember::TsIndexSignature(_) => false,
            ClassMember::Method(method) => !method.is_abstract && method.function.body.is_some(),
            ClassMember::ClassProp(prop) => !prop.declare,
            _ => true,
        });
        for member in &mut class.body {
            match member {
                ClassMember::Method(method) => {
                    method.accessibility = None;
                    method.is_abstract = false;
                    method.is_override = false;
                    method.is_optional = false;
                }
                ClassMember::ClassProp(prop) => {
                    prop.type_ann = None;
                    prop.accessibility = None;
                    prop.readonly = false;
                    prop.is_override = false;
                    prop.is_optional = false;
                    prop.definite = false;
                }
                _ => {}
            }
        }
        class.visit_mut_children_with(self);
    }

    fn visit_mut_constructor(&mut self, ctor: &mut Constructor) {
        ctor.accessibility = None;
        lower_param_props(ctor);
        ctor.visit_mut_children_with(self);
    }
}

fn unwrap_ts_expr(expr: &mut Expr) -> Option<Expr> {
    match expr {
        Expr::TsAs(e) => Some(*e.expr.take()),
        Expr::TsNonNull(e) => Some(*e.expr.take()),
        Expr::TsTypeAssertion(e) => Some(*e.expr.take()),
        Expr::TsConstAssertion(e) => Some(*e.expr.take()),
        Expr::TsSatisfies(e) => Some(*e.expr.take()),
        Expr::TsInstantiation(e) => Some(*e.expr.take()),
        _ => None,
    }
}

/// `constructor(private x)` becomes a plain parameter plus a
/// `this.x = x;` assignment at the top of the body.
fn lower_param_props(ctor: &mut Constructor) {
    let mut assignments: Vec<Stmt> = Vec::new();
    for param in &mut ctor.params {
        if let ParamOrTsParamProp::TsParamProp(prop) = param {
            let (pat, name) = match &prop.param {
                TsParamPropParam::Ident(binding) => {
                    (Pat::Ident(binding.clone()), binding.id.sym.to_string())
                }
                TsParamPropParam::Assign(assign) => {
                    let name = match assign.left.as_ref() {
                        Pat::Ident(binding) => binding.id.sym.to_string(),
                        _ => continue,
                    };
                    (Pat::Assign(assign.clone()), name)
                }
            };
            assignments.push(this_assignment(&name));
            *param = ParamOrTsParamProp::Param(Param {
                span: DUMMY_SP,
                decorators: Vec::new(),
                pat,
            });
        }
    }
    if assignments.is_empty() {
        return;
    }
    if let Some(body) = &mut ctor.body {
        assignments.extend(std::mem::take(&mut body.stmts));
        body.stmts = assignments;
    }
}

fn this_assignment(name: &str) -> Stmt {
    Stmt::Expr(ExprStmt {
        span: DUMMY_SP,
        expr: Box::new(Expr::Assign(AssignExpr {
            span: DUMMY_SP,
            op: AssignOp::Assign,
            left: AssignTarget::Simple(SimpleAssignTarget::Member(MemberExpr {
                span: DUMMY_SP,
                obj: Box::new(Expr::This(ThisExpr { span: DUMMY_SP })),
                prop: MemberProp::Ident(IdentName::new(name.into(), DUMMY_SP)),
            })),
            right: Box::new(Expr::Ident(Ident::new(
                name.into(),
                DUMMY_SP,
                SyntaxContext::empty(),
            ))),
        })),
    })
}

#[cfg(test)]
mod tests {
    use deno_ast::swc::common::{sync::Lrc, SourceMap};

    use super::*;
    use crate::parser::parse_expr_snippet;

    fn strip(code: &str) -> String {
        let cm: Lrc<SourceMap> = Lrc::new(SourceMap::default());
        let mut expr = parse_expr_snippet(&cm, "(test)", code).expect("snippet should parse");
        expr.visit_mut_with(&mut TypeStripper);
        let declaration = crate::declaration::Declaration::DefaultExpr(expr);
        crate::code_generator::declaration_to_snippet(&cm, &declaration)
    }

    #[test]
    fn strips_annotations_and_assertions() {
        let code = strip("(a: number, b?: string): number => (a as number) + f<number>(b!)");
        assert!(!code.contains(": number"));
        assert!(!code.contains(" as "));
        assert!(!code.contains("<number>"));
        assert!(!code.contains("!"));
    }

    #[test]
    fn lowers_constructor_parameter_properties() {
        let code = strip("class Point { constructor(private x: number) {} }");
        assert!(code.contains("this.x = x"));
        assert!(!code.contains("private"));
    }
}
