//! JSX to automatic-runtime rewriting.
//!
//! Rewrites `<div a="1">{x}</div>` into `_jsx("div", { a: "1", children: x })`
//! and injects a single hoisted import of `jsx`/`jsxs`/`Fragment` from
//! `react/jsx-runtime` (served by the module resolver's stub). Elements whose
//! tag starts with a lowercase letter are intrinsic and become string
//! literals; anything else stays an identifier/member reference.

use swc_common::{DUMMY_SP, SyntaxContext};
use swc_ecma_ast::{
    ArrayLit, CallExpr, Callee, Expr, ExprOrSpread, Ident, IdentName, ImportDecl,
    ImportNamedSpecifier, ImportPhase, ImportSpecifier, JSXAttrName, JSXAttrOrSpread, JSXAttrValue,
    JSXElement, JSXElementChild, JSXElementName, JSXExpr, JSXFragment, KeyValueProp, Lit,
    MemberExpr, MemberProp, Module, ModuleDecl, ModuleExportName, ModuleItem, ObjectLit, Program,
    Prop, PropName, PropOrSpread, SpreadElement, Str,
};
use swc_ecma_visit::{VisitMut, VisitMutWith};

/// Local names bound by the injected runtime import.
const JSX_FN: &str = "_jsx";
const JSXS_FN: &str = "_jsxs";
const FRAGMENT: &str = "_Fragment";

/// Specifier the runtime helpers are imported from.
pub const JSX_RUNTIME_SPECIFIER: &str = "react/jsx-runtime";

/// Rewrites all JSX in `program` and injects the runtime import when any
/// element was found. Returns whether a rewrite happened.
pub fn rewrite_jsx(program: &mut Program) -> bool {
    let mut pass = JsxRewrite { found: false };
    program.visit_mut_with(&mut pass);

    if pass.found {
        if let Program::Module(module) = program {
            prepend_runtime_import(module);
        }
    }
    pass.found
}

struct JsxRewrite {
    found: bool,
}

impl VisitMut for JsxRewrite {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        // Bottom-up: inner expression containers are rewritten first.
        expr.visit_mut_children_with(self);

        match expr {
            Expr::JSXElement(_) => {
                self.found = true;
                let Expr::JSXElement(element) = std::mem::replace(expr, dummy_expr()) else {
                    return;
                };
                *expr = convert_element(*element);
            }
            Expr::JSXFragment(_) => {
                self.found = true;
                let Expr::JSXFragment(fragment) = std::mem::replace(expr, dummy_expr()) else {
                    return;
                };
                *expr = convert_fragment(fragment);
            }
            _ => {}
        }
    }
}

fn dummy_expr() -> Expr {
    Expr::Lit(Lit::Null(swc_ecma_ast::Null { span: DUMMY_SP }))
}

fn ident(name: &str) -> Ident {
    Ident::new(name.into(), DUMMY_SP, SyntaxContext::empty())
}

fn string_lit(value: &str) -> Expr {
    Expr::Lit(Lit::Str(Str {
        span: DUMMY_SP,
        value: value.into(),
        raw: None,
    }))
}

fn prop_name(key: &str) -> PropName {
    let valid_ident = !key.is_empty()
        && !key.starts_with(|character: char| character.is_ascii_digit())
        && key
            .chars()
            .all(|character| character.is_alphanumeric() || character == '_' || character == '$');
    if valid_ident {
        PropName::Ident(IdentName::new(key.into(), DUMMY_SP))
    } else {
        PropName::Str(Str {
            span: DUMMY_SP,
            value: key.into(),
            raw: None,
        })
    }
}

fn key_value(key: &str, value: Expr) -> PropOrSpread {
    PropOrSpread::Prop(Box::new(Prop::KeyValue(KeyValueProp {
        key: prop_name(key),
        value: Box::new(value),
    })))
}

/// Converts the element tag into the first call argument.
fn convert_tag(name: JSXElementName) -> Expr {
    match name {
        JSXElementName::Ident(tag) => {
            let text = tag.sym.as_str();
            if text.starts_with(|character: char| character.is_ascii_lowercase()) {
                string_lit(text)
            } else {
                Expr::Ident(tag)
            }
        }
        JSXElementName::JSXMemberExpr(member) => convert_member(member),
        JSXElementName::JSXNamespacedName(namespaced) => {
            string_lit(&format!("{}:{}", namespaced.ns.sym, namespaced.name.sym))
        }
    }
}

fn convert_member(member: swc_ecma_ast::JSXMemberExpr) -> Expr {
    let object = match member.obj {
        swc_ecma_ast::JSXObject::Ident(tag) => Expr::Ident(tag),
        swc_ecma_ast::JSXObject::JSXMemberExpr(inner) => convert_member(*inner),
    };
    Expr::Member(MemberExpr {
        span: DUMMY_SP,
        obj: Box::new(object),
        prop: MemberProp::Ident(IdentName::new(member.prop.sym, DUMMY_SP)),
    })
}

/// Converts children to expressions, dropping whitespace-only text.
fn convert_children(children: Vec<JSXElementChild>) -> Vec<Expr> {
    let mut converted = Vec::new();
    for child in children {
        match child {
            JSXElementChild::JSXText(text) => {
                let collapsed = collapse_jsx_text(text.value.as_str());
                if !collapsed.is_empty() {
                    converted.push(string_lit(&collapsed));
                }
            }
            JSXElementChild::JSXExprContainer(container) => {
                if let JSXExpr::Expr(inner) = container.expr {
                    converted.push(*inner);
                }
            }
            JSXElementChild::JSXElement(element) => converted.push(convert_element(*element)),
            JSXElementChild::JSXFragment(fragment) => converted.push(convert_fragment(fragment)),
            JSXElementChild::JSXSpreadChild(spread) => converted.push(*spread.expr),
        }
    }
    converted
}

/// Collapses runs of whitespace the way JSX text is normalized.
fn collapse_jsx_text(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
}

/// Builds the props object (attributes plus a `children` entry) and selects
/// `_jsx` vs `_jsxs` based on child count.
fn build_call(tag: Expr, attrs: Vec<JSXAttrOrSpread>, children: Vec<Expr>) -> Expr {
    let mut props: Vec<PropOrSpread> = Vec::new();
    let mut key_arg: Option<Expr> = None;

    for attr in attrs {
        match attr {
            JSXAttrOrSpread::JSXAttr(attribute) => {
                let name = match &attribute.name {
                    JSXAttrName::Ident(name) => name.sym.to_string(),
                    JSXAttrName::JSXNamespacedName(namespaced) => {
                        format!("{}:{}", namespaced.ns.sym, namespaced.name.sym)
                    }
                };
                let value = match attribute.value {
                    None => Expr::Lit(Lit::Bool(swc_ecma_ast::Bool {
                        span: DUMMY_SP,
                        value: true,
                    })),
                    Some(JSXAttrValue::Lit(lit)) => Expr::Lit(lit),
                    Some(JSXAttrValue::JSXExprContainer(container)) => match container.expr {
                        JSXExpr::Expr(inner) => *inner,
                        JSXExpr::JSXEmptyExpr(_) => continue,
                    },
                    Some(JSXAttrValue::JSXElement(element)) => convert_element(*element),
                    Some(JSXAttrValue::JSXFragment(fragment)) => convert_fragment(fragment),
                };
                if name == "key" {
                    key_arg = Some(value);
                } else {
                    props.push(key_value(&name, value));
                }
            }
            JSXAttrOrSpread::SpreadElement(spread) => {
                props.push(PropOrSpread::Spread(SpreadElement {
                    dot3_token: DUMMY_SP,
                    expr: spread.expr,
                }));
            }
        }
    }

    let multiple = children.len() > 1;
    match children.len() {
        0 => {}
        1 => {
            let mut iterator = children.into_iter();
            if let Some(only) = iterator.next() {
                props.push(key_value("children", only));
            }
        }
        _ => {
            let elements = children
                .into_iter()
                .map(|child| {
                    Some(ExprOrSpread {
                        spread: None,
                        expr: Box::new(child),
                    })
                })
                .collect();
            props.push(key_value(
                "children",
                Expr::Array(ArrayLit {
                    span: DUMMY_SP,
                    elems: elements,
                }),
            ));
        }
    }

    let callee_name = if multiple { JSXS_FN } else { JSX_FN };
    let mut args = vec![
        ExprOrSpread {
            spread: None,
            expr: Box::new(tag),
        },
        ExprOrSpread {
            spread: None,
            expr: Box::new(Expr::Object(ObjectLit {
                span: DUMMY_SP,
                props,
            })),
        },
    ];
    if let Some(key) = key_arg {
        args.push(ExprOrSpread {
            spread: None,
            expr: Box::new(key),
        });
    }

    Expr::Call(CallExpr {
        span: DUMMY_SP,
        ctxt: SyntaxContext::empty(),
        callee: Callee::Expr(Box::new(Expr::Ident(ident(callee_name)))),
        args,
        type_args: None,
    })
}

fn convert_element(element: JSXElement) -> Expr {
    let tag = convert_tag(element.opening.name);
    let children = convert_children(element.children);
    build_call(tag, element.opening.attrs, children)
}

fn convert_fragment(fragment: JSXFragment) -> Expr {
    let children = convert_children(fragment.children);
    build_call(Expr::Ident(ident(FRAGMENT)), Vec::new(), children)
}

/// Inserts `import { jsx as _jsx, jsxs as _jsxs, Fragment as _Fragment }
/// from "react/jsx-runtime";` at the top of the module.
fn prepend_runtime_import(module: &mut Module) {
    let specifier = |exported: &str, local: &str| {
        ImportSpecifier::Named(ImportNamedSpecifier {
            span: DUMMY_SP,
            local: ident(local),
            imported: Some(ModuleExportName::Ident(ident(exported))),
            is_type_only: false,
        })
    };

    let import = ImportDecl {
        span: DUMMY_SP,
        specifiers: vec![
            specifier("jsx", JSX_FN),
            specifier("jsxs", JSXS_FN),
            specifier("Fragment", FRAGMENT),
        ],
        src: Box::new(Str {
            span: DUMMY_SP,
            value: JSX_RUNTIME_SPECIFIER.into(),
            raw: None,
        }),
        type_only: false,
        with: None,
        phase: ImportPhase::Evaluation,
    };

    module
        .body
        .insert(0, ModuleItem::ModuleDecl(ModuleDecl::Import(import)));
}
