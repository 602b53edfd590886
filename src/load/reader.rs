//! Reads the expander's JSON output into raw syntax trees.
//!
//! Every JSON object is one form, selected by the key it carries (`"operator"`
//! for an application, `"test"` for a conditional, `"lambda"` for a procedure
//! and so on). A handful of core forms are instead encoded as arrays headed by a
//! kernel identifier, e.g. `[{"source-name": "begin"}, ...]`.

use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;
use serde_json::{Map, Value as Json};

use crate::{
    compiler::tree_il::*,
    runtime::{
        error::{LoadError, SourceLocation, StructuralError},
        module::{is_builtin, ModulePath},
        number::Number,
        symbol::Symbol,
        value::{Prefab, Regexp, RegexpKind, Value},
    },
};

use super::Loader;

type Object = Map<String, Json>;

const KERNEL: &str = "#%kernel";

fn as_object<'j>(json: &'j Json) -> Result<&'j Object, StructuralError> {
    json.as_object()
        .ok_or_else(|| StructuralError::new("expected an object", json))
}

fn as_array<'j>(json: &'j Json) -> Result<&'j Vec<Json>, StructuralError> {
    json.as_array()
        .ok_or_else(|| StructuralError::new("expected an array", json))
}

fn as_str(json: &Json) -> Result<&str, StructuralError> {
    json.as_str()
        .ok_or_else(|| StructuralError::new("expected a string", json))
}

fn field<'j>(obj: &'j Object, key: &str) -> Result<&'j Json, StructuralError> {
    obj.get(key).ok_or_else(|| {
        StructuralError::new(format!("missing key {:?}", key), &Json::Object(obj.clone()))
    })
}

fn symbol(json: &Json) -> Result<Symbol, StructuralError> {
    as_str(json).map(Symbol::intern)
}

/// Name of a variable record such as `{"lexical": "x"}`.
fn variable_name(json: &Json) -> Result<Symbol, StructuralError> {
    let obj = as_object(json)?;
    for key in ["toplevel", "lexical", "module"] {
        if let Some(name) = obj.get(key) {
            return symbol(name);
        }
    }
    Err(StructuralError::new("expected a variable", json))
}

fn strings(json: &Json) -> Result<Vec<String>, StructuralError> {
    as_array(json)?
        .iter()
        .map(|s| as_str(s).map(str::to_owned))
        .collect()
}

/// `[a b]`, `{"improper": [[a], b]}` or `{"lexical": rest}`.
fn to_formals(json: &Json) -> Result<(Vec<Symbol>, Option<Symbol>), StructuralError> {
    match json {
        Json::Array(formals) => Ok((
            formals.iter().map(variable_name).collect::<Result<_, _>>()?,
            None,
        )),
        Json::Object(obj) if obj.contains_key("improper") => {
            let parts = as_array(field(obj, "improper")?)?;
            let [regular, last] = parts.as_slice() else {
                return Err(StructuralError::new("malformed improper formals", json));
            };
            let regular = as_array(regular)?
                .iter()
                .map(variable_name)
                .collect::<Result<_, _>>()?;
            Ok((regular, Some(variable_name(last)?)))
        }
        Json::Object(obj) if obj.contains_key("lexical") => {
            Ok((vec![], Some(symbol(field(obj, "lexical")?)?)))
        }
        _ => Err(StructuralError::new("malformed formals", json)),
    }
}

fn to_srcloc(obj: &Object) -> Option<SourceLocation> {
    let position = obj.get("position").and_then(Json::as_i64);
    let file = obj
        .get("source")
        .and_then(Json::as_object)
        .and_then(|source| source.get("%p").or_else(|| source.get("quote")))
        .and_then(Json::as_str)
        .map(Rc::from);
    if position.is_none() && file.is_none() {
        return None;
    }
    Some(SourceLocation {
        position: position.unwrap_or(-1),
        file,
    })
}

/// Kernel form name of an array head like `{"source-name": "begin"}`.
fn kernel_form(json: &Json) -> Option<&str> {
    let obj = json.as_object()?;
    let name = obj.get("source-name")?.as_str()?;
    let from_kernel = match obj.get("source-module") {
        None => true,
        Some(Json::String(module)) => module == KERNEL,
        Some(Json::Array(path)) => path.len() == 1 && path[0] == KERNEL,
        Some(_) => false,
    };
    from_kernel.then_some(name)
}

pub struct JsonReader<'a> {
    loader: &'a Loader,
    /// Modules being read, innermost last.
    current: RefCell<Vec<ModulePath>>,
}

impl<'a> JsonReader<'a> {
    pub fn new(loader: &'a Loader) -> Self {
        Self {
            loader,
            current: RefCell::new(vec![]),
        }
    }

    fn current_module(&self) -> Option<ModulePath> {
        self.current.borrow().last().cloned()
    }

    pub fn to_module(&self, json: &Json, path: ModulePath) -> Result<Module, LoadError> {
        self.current.borrow_mut().push(path.clone());
        let module = self.read_module(json, path);
        self.current.borrow_mut().pop();
        module
    }

    fn read_module(&self, json: &Json, path: ModulePath) -> Result<Module, LoadError> {
        let obj = as_object(json)?;
        let forms = as_array(field(obj, "body-forms")?)?;
        let name = as_str(field(obj, "module-name")?)?.to_owned();

        let mut config = IndexMap::new();
        if let Some(Json::Object(entries)) = obj.get("config") {
            for (key, value) in entries {
                let value = match value {
                    Json::String(s) => s.clone(),
                    other => other.to_string(),
                };
                config.insert(key.clone(), value);
            }
        }

        let lang = match obj.get("language").and_then(Json::as_array) {
            Some(lang) if !lang.is_empty() => {
                Some(self.parse_require(vec![as_str(&lang[0])?.to_owned()])?)
            }
            _ => None,
        };

        let body = forms
            .iter()
            .map(|form| self.to_ast(form))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Module::new(name, path, body, config, lang))
    }

    /// A require of `path`, where `path[0]` is a file or a relative `"."`
    /// / `".."` segment and the rest are submodule names.
    fn parse_require(&self, path: Vec<String>) -> Result<Ast, LoadError> {
        let Some((file, submodules)) = path.split_first() else {
            return Ok(make_void());
        };

        let target = if file == "." || file == ".." {
            self.current_module()
                .and_then(|current| current.relative(&path))
        } else {
            if self.loader.require_file(file)? {
                return Ok(make_void());
            }
            ModulePath::new(file.clone()).relative(submodules)
        };

        match target {
            Some(target) => Ok(make_require(target)),
            None => Err(StructuralError::new(
                "malformed submodule path",
                &Json::from(path.clone()),
            )
            .into()),
        }
    }

    /// Source module of a module variable.
    fn source_module(&self, obj: &Object) -> Result<SourceModule, StructuralError> {
        let current = || match self.current_module() {
            Some(path) => SourceModule::Path(path),
            None => SourceModule::Builtin(KERNEL.to_owned()),
        };
        match obj.get("source-module") {
            None => Ok(SourceModule::Builtin(KERNEL.to_owned())),
            Some(Json::String(file)) if is_builtin(file) => Ok(SourceModule::Builtin(file.clone())),
            Some(json @ Json::Array(_)) => {
                let path = strings(json)?;
                let Some((file, submodules)) = path.split_first() else {
                    return Ok(current());
                };
                if is_builtin(file) {
                    return Ok(SourceModule::Builtin(file.clone()));
                }
                let resolved = if file == "." || file == ".." {
                    self.current_module().and_then(|m| m.relative(&path))
                } else {
                    ModulePath::new(file.clone()).relative(submodules)
                };
                resolved
                    .map(SourceModule::Path)
                    .ok_or_else(|| StructuralError::new("malformed submodule path", json))
            }
            Some(_) => Ok(current()),
        }
    }

    fn module_var(&self, obj: &Object) -> Result<ModuleVar, StructuralError> {
        let srcsym = symbol(field(obj, "source-name")?)?;
        let name = match obj.get("module") {
            Some(name) => symbol(name)?,
            None => srcsym.clone(),
        };
        Ok(ModuleVar::new(name, srcsym, self.source_module(obj)?))
    }

    fn to_lambda(&self, obj: &Object) -> Result<(Lambda, Option<SourceLocation>), LoadError> {
        let (formals, rest) = to_formals(field(obj, "lambda")?)?;
        let body = self.to_body(field(obj, "body")?)?;
        let arm = Lambda {
            formals,
            rest,
            body: make_begin(body),
            boxed: vec![],
        };
        Ok((arm, to_srcloc(obj)))
    }

    fn to_body(&self, json: &Json) -> Result<Vec<Ast>, LoadError> {
        as_array(json)?.iter().map(|form| self.to_ast(form)).collect()
    }

    fn to_bindings(&self, json: &Json) -> Result<(Vec<Vec<Symbol>>, Vec<Ast>), LoadError> {
        let bindings = as_array(json)?;
        let mut vars = Vec::with_capacity(bindings.len());
        let mut rhss = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let [names, rhs] = as_array(binding)?.as_slice() else {
                return Err(StructuralError::new("malformed binding", binding).into());
            };
            vars.push(as_array(names)?.iter().map(symbol).collect::<Result<_, _>>()?);
            rhss.push(self.to_ast(rhs)?);
        }
        Ok((vars, rhss))
    }

    pub fn to_ast(&self, json: &Json) -> Result<Ast, LoadError> {
        match json {
            Json::Array(forms) => self.to_kernel_form(json, forms),
            Json::Object(obj) => self.to_object_form(json, obj),
            _ => Err(StructuralError::new("unexpected JSON value", json).into()),
        }
    }

    fn to_kernel_form(&self, json: &Json, forms: &[Json]) -> Result<Ast, LoadError> {
        let Some((head, args)) = forms.split_first() else {
            return Err(StructuralError::new("empty form", json).into());
        };
        let unexpected = || StructuralError::new("unexpected kernel form", json);
        let name = kernel_form(head).ok_or_else(unexpected)?;
        match name {
            "begin" => Ok(make_begin(
                args.iter().map(|x| self.to_ast(x)).collect::<Result<_, _>>()?,
            )),
            "#%expression" => self.to_ast(args.first().ok_or_else(unexpected)?),
            "set!" => {
                let [target, rhs] = args else {
                    return Err(unexpected().into());
                };
                let target_obj = as_object(target)?;
                let target = if target_obj.contains_key("source-name") {
                    SetTarget::Module(self.module_var(target_obj)?)
                } else if let Some(name) = target_obj.get("lexical") {
                    SetTarget::Lexical(LexicalVar {
                        sym: symbol(name)?,
                        slot: None,
                    })
                } else if let Some(name) = target_obj.get("toplevel") {
                    SetTarget::Toplevel(symbol(name)?)
                } else {
                    return Err(StructuralError::new("malformed set! target", target).into());
                };
                Ok(make_set_bang(target, self.to_ast(rhs)?))
            }
            "begin-for-syntax" | "define-syntaxes" | "#%require" | "#%provide" => Ok(make_void()),
            _ => Err(unexpected().into()),
        }
    }

    fn to_object_form(&self, json: &Json, obj: &Object) -> Result<Ast, LoadError> {
        if let Some(paths) = obj.get("require") {
            let mut requires = vec![];
            for path in as_array(paths)? {
                let path = strings(path)?;
                if !path.is_empty() {
                    requires.push(self.parse_require(path)?);
                }
            }
            return Ok(make_begin(requires));
        }
        if let Some(first) = obj.get("begin0") {
            let first = self.to_ast(first)?;
            let rest = self.to_body(field(obj, "begin0-rest")?)?;
            return Ok(make_begin0(first, rest));
        }
        if let Some(forms) = obj.get("begin-for-syntax") {
            return Ok(make_begin_for_syntax(self.to_body(forms)?));
        }
        if let Some(key) = obj.get("wcm-key") {
            return Ok(make_wcm(
                self.to_ast(key)?,
                self.to_ast(field(obj, "wcm-val")?)?,
                self.to_ast(field(obj, "wcm-body")?)?,
            ));
        }
        if let Some(names) = obj.get("define-values") {
            let names: Vec<Symbol> = as_array(names)?.iter().map(symbol).collect::<Result<_, _>>()?;
            let display_names = match obj.get("define-values-names") {
                Some(display) => as_array(display)?.iter().map(symbol).collect::<Result<_, _>>()?,
                None => names.clone(),
            };
            let rhs = self.to_ast(field(obj, "define-values-body")?)?;
            return Ok(make_define_values(names, rhs, display_names, self.current_module()));
        }
        if let Some(bindings) = obj.get("letrec-bindings") {
            let body = self.to_body(field(obj, "letrec-body")?)?;
            let (vars, rhss) = self.to_bindings(bindings)?;
            if vars.is_empty() {
                return Ok(make_begin(body));
            }
            return Ok(make_letrec(vars, rhss, body));
        }
        if let Some(bindings) = obj.get("let-bindings") {
            let body = self.to_body(field(obj, "let-body")?)?;
            let (vars, rhss) = self.to_bindings(bindings)?;
            if vars.is_empty() {
                return Ok(make_begin(body));
            }
            return Ok(make_let(vars, rhss, body));
        }
        if let Some(var) = obj.get("variable-reference") {
            let var = match var {
                Json::Bool(_) => None,
                var => Some(self.to_ast(var)?),
            };
            return Ok(make_variable_reference(var, self.current_module()));
        }
        if obj.contains_key("lambda") {
            let (arm, srcloc) = self.to_lambda(obj)?;
            return Ok(make_case_lambda(vec![arm], srcloc));
        }
        if let Some(arms) = obj.get("case-lambda") {
            let mut lambdas = vec![];
            let mut srcloc = to_srcloc(obj);
            for arm in as_array(arms)? {
                let (arm, loc) = self.to_lambda(as_object(arm)?)?;
                srcloc = srcloc.or(loc);
                lambdas.push(arm);
            }
            return Ok(make_case_lambda(lambdas, srcloc));
        }
        if let Some(rator) = obj.get("operator") {
            let rator = self.to_ast(rator)?;
            let rands = self.to_body(field(obj, "operands")?)?;
            return Ok(make_app_let_converted(rator, rands));
        }
        if let Some(test) = obj.get("test") {
            return Ok(make_if_let_converted(
                self.to_ast(test)?,
                self.to_ast(field(obj, "then")?)?,
                self.to_ast(field(obj, "else")?)?,
            ));
        }
        if let Some(datum) = obj.get("quote").or_else(|| obj.get("quote-syntax")) {
            return Ok(make_quote(to_value(datum)?));
        }
        if obj.contains_key("source-name") {
            return Ok(make_module_var(self.module_var(obj)?));
        }
        if let Some(name) = obj.get("lexical") {
            return Ok(make_lexical(symbol(name)?));
        }
        if let Some(name) = obj.get("toplevel") {
            return Ok(make_toplevel(symbol(name)?));
        }
        if let Some(name) = obj.get("module-name") {
            let name = as_str(name)?;
            let path = match self.current_module() {
                Some(current) => current.submodule(name),
                None => ModulePath::new(name),
            };
            return Ok(make_module(self.to_module(json, path)?));
        }
        Err(StructuralError::new("unexpected JSON object", json).into())
    }
}

fn to_number(json: &Json) -> Result<Number, StructuralError> {
    if let Some(n) = json.as_i64() {
        return Ok(Number::Fixnum(n));
    }
    if let Some(f) = json.as_f64() {
        return Ok(Number::Flonum(f));
    }
    let obj = as_object(json)?;
    if let Some(real) = obj.get("real") {
        return real
            .as_f64()
            .map(Number::Flonum)
            .ok_or_else(|| StructuralError::new("malformed real", json));
    }
    if let Some(real) = obj.get("real-part") {
        let imag = to_number(field(obj, "imag-part")?)?;
        return Ok(Number::make_complex(to_number(real)?, imag));
    }
    if let Some(numerator) = obj.get("numerator") {
        let denominator = to_number(field(obj, "denominator")?)?;
        return Number::make_rational(to_number(numerator)?, denominator)
            .map_err(|err| StructuralError::new(err.message, json));
    }
    if let Some(extended) = obj.get("extended-real") {
        return match as_str(extended)? {
            "+inf.0" => Ok(Number::Flonum(f64::INFINITY)),
            "-inf.0" => Ok(Number::Flonum(f64::NEG_INFINITY)),
            "+nan.0" => Ok(Number::Flonum(f64::NAN)),
            _ => Err(StructuralError::new("unknown extended real", json)),
        };
    }
    if let Some(integer) = obj.get("integer") {
        return Number::parse_integer(as_str(integer)?)
            .ok_or_else(|| StructuralError::new("malformed integer", json));
    }
    Err(StructuralError::new("unexpected number", json))
}

fn to_bytes(json: &Json) -> Result<Vec<u8>, StructuralError> {
    as_array(json)?
        .iter()
        .map(|b| {
            b.as_u64()
                .and_then(|b| u8::try_from(b).ok())
                .ok_or_else(|| StructuralError::new("expected a byte", b))
        })
        .collect()
}

fn to_regexp(kind: RegexpKind, source: String) -> Value {
    Value::Regexp(Rc::new(Regexp { kind, source }))
}

fn to_values(json: &Json) -> Result<Vec<Value>, StructuralError> {
    as_array(json)?.iter().map(to_value).collect()
}

/// Reconstructs a quoted datum.
pub fn to_value(json: &Json) -> Result<Value, StructuralError> {
    let obj = match json {
        Json::Bool(b) => return Ok(Value::Bool(*b)),
        Json::Number(_) => return Ok(to_number(json)?.into()),
        Json::String(s) => return Ok(Value::string(s)),
        Json::Array(elements) => {
            return Ok(Value::list(
                elements.iter().map(to_value).collect::<Result<_, _>>()?,
            ))
        }
        Json::Null => return Err(StructuralError::new("unexpected null", json)),
        Json::Object(obj) => obj,
    };

    if let Some(elements) = obj.get("vector") {
        return Ok(Value::vector(to_values(elements)?));
    }
    if let Some(fields) = obj.get("struct") {
        let key = to_value(field(obj, "prefab-key")?)?;
        let fields = to_values(fields)?;
        return Ok(Value::Prefab(Rc::new(Prefab { key, fields })));
    }
    if let Some(contents) = obj.get("box") {
        return Ok(Value::Box(Rc::new(RefCell::new(to_value(contents)?))));
    }
    if let Some(number) = obj.get("number") {
        return Ok(to_number(number)?.into());
    }
    if let Some(path) = obj.get("path") {
        return Ok(Value::Path(Rc::from(as_str(path)?)));
    }
    if let Some(code) = obj.get("char") {
        return as_str(code)?
            .parse::<u32>()
            .ok()
            .and_then(char::from_u32)
            .map(Value::Char)
            .ok_or_else(|| StructuralError::new("malformed char", json));
    }
    if let (Some(keys), Some(vals)) = (obj.get("hash-keys"), obj.get("hash-vals")) {
        let keys = to_values(keys)?;
        let vals = to_values(vals)?;
        if keys.len() != vals.len() {
            return Err(StructuralError::new("hash keys and values differ in length", json));
        }
        return Ok(Value::Hash(Rc::new(keys.into_iter().zip(vals).collect())));
    }
    if let Some(source) = obj.get("regexp") {
        return Ok(to_regexp(RegexpKind::Regexp, as_str(source)?.to_owned()));
    }
    if let Some(source) = obj.get("pregexp") {
        return Ok(to_regexp(RegexpKind::Pregexp, as_str(source)?.to_owned()));
    }
    if let Some(bytes) = obj.get("byte-regexp") {
        let source = String::from_utf8_lossy(&to_bytes(bytes)?).into_owned();
        return Ok(to_regexp(RegexpKind::ByteRegexp, source));
    }
    if let Some(bytes) = obj.get("byte-pregexp") {
        let source = String::from_utf8_lossy(&to_bytes(bytes)?).into_owned();
        return Ok(to_regexp(RegexpKind::BytePregexp, source));
    }
    if let Some(bytes) = obj.get("bytes") {
        return Ok(Value::Bytes(Rc::from(to_bytes(bytes)?)));
    }
    if let Some(s) = obj.get("string") {
        return Ok(Value::string(as_str(s)?));
    }
    if let Some(keyword) = obj.get("keyword") {
        return Ok(Value::Keyword(symbol(keyword)?));
    }
    if let Some(improper) = obj.get("improper") {
        let [elements, tail] = as_array(improper)?.as_slice() else {
            return Err(StructuralError::new("malformed improper list", json));
        };
        return Ok(Value::improper(to_values(elements)?, to_value(tail)?));
    }
    for key in ["toplevel", "lexical", "module", "source-name"] {
        if let Some(name) = obj.get(key) {
            return Ok(Value::Symbol(symbol(name)?));
        }
    }
    Err(StructuralError::new("unexpected datum", json))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn datum(json: Json) -> String {
        to_value(&json).unwrap().to_string()
    }

    #[test]
    fn literals() {
        assert_eq!(datum(json!(true)), "#t");
        assert_eq!(datum(json!([1, 2, {"string": "a"}])), "(1 2 \"a\")");
        assert_eq!(datum(json!({"improper": [[{"toplevel": "a"}], 2]})), "(a . 2)");
        assert_eq!(datum(json!({"vector": [1, {"char": "97"}]})), "#(1 #\\a)");
        assert_eq!(datum(json!({"box": {"keyword": "k"}})), "#&#:k");
        assert_eq!(datum(json!({"bytes": [104, 105]})), "#\"hi\"");
        assert!(to_value(&json!({"char": "nope"})).is_err());
        assert!(to_value(&json!({"mystery": 1})).is_err());
    }

    #[test]
    fn numbers() {
        let num = |json: Json| to_number(&json).unwrap().to_string();
        assert_eq!(num(json!({"integer": "12"})), "12");
        assert_eq!(
            num(json!({"integer": "123456789012345678901234567890"})),
            "123456789012345678901234567890"
        );
        assert_eq!(
            num(json!({"numerator": {"integer": "6"}, "denominator": {"integer": "4"}})),
            "3/2"
        );
        assert_eq!(
            num(json!({"numerator": {"integer": "4"}, "denominator": {"integer": "2"}})),
            "2"
        );
        assert_eq!(num(json!({"real": 1.5})), "1.5");
        assert_eq!(num(json!({"extended-real": "-inf.0"})), "-inf.0");
        assert_eq!(
            num(json!({"real-part": {"integer": "1"}, "imag-part": {"integer": "2"}})),
            "1+2i"
        );
        assert!(to_number(&json!({"numerator": {"integer": "1"}, "denominator": {"integer": "0"}})).is_err());
    }

    #[test]
    fn formals_shapes() {
        let (formals, rest) = to_formals(&json!([{"lexical": "a"}, {"lexical": "b"}])).unwrap();
        assert_eq!(formals.len(), 2);
        assert!(rest.is_none());

        let (formals, rest) =
            to_formals(&json!({"improper": [[{"lexical": "a"}], {"lexical": "r"}]})).unwrap();
        assert_eq!(formals, vec![Symbol::intern("a")]);
        assert_eq!(rest, Some(Symbol::intern("r")));

        let (formals, rest) = to_formals(&json!({"lexical": "args"})).unwrap();
        assert!(formals.is_empty());
        assert_eq!(rest, Some(Symbol::intern("args")));
    }

    #[test]
    fn srcloc_sources() {
        let obj = json!({"position": 7, "source": {"%p": "/a.rkt"}});
        let loc = to_srcloc(obj.as_object().unwrap()).unwrap();
        assert_eq!(loc.position, 7);
        assert_eq!(loc.file.as_deref(), Some("/a.rkt"));
        assert!(to_srcloc(json!({}).as_object().unwrap()).is_none());
    }

    #[test]
    fn kernel_heads() {
        assert_eq!(kernel_form(&json!({"source-name": "begin"})), Some("begin"));
        assert_eq!(
            kernel_form(&json!({"source-name": "set!", "source-module": "#%kernel"})),
            Some("set!")
        );
        assert_eq!(
            kernel_form(&json!({"source-name": "begin", "source-module": ["/x.rkt"]})),
            None
        );
    }
}
