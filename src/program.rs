//! The program oracle: registered elements, the class arena, and the
//! resolver surface the lowering engine consults.
//!
//! `Program::new` walks the top-level declarations of every source and
//! registers one element per name (namespaces register their members with
//! a dotted prefix). Generic prototypes are instantiated on demand during
//! compilation; concrete classes live in an arena and are referenced by
//! index everywhere so that class/method/signature cycles never share
//! owning handles.

use std::collections::HashMap;

use crate::ast::{
    ClassMember, Expression, FunctionDeclaration, MethodKind, Modifiers, ParameterDeclaration,
    Source, Statement, TypeNode,
};
use crate::element::{
    ClassPrototype, Element, ElementFlags, Enum, FunctionPrototype, Global, Namespace,
};
use crate::types::{ClassId, Signature, SignatureId, Target, Type, TypeKind};

/// Contextual type arguments in scope while resolving a type node.
pub type TypeArguments = HashMap<String, Type>;

/// A resolved instance field with its computed byte offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: Type,
    pub offset: u32,
    pub readonly: bool,
    pub initializer: Option<Expression>,
}

/// A concrete (fully parameterized) class with computed layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Class {
    pub id: ClassId,
    pub name: String,
    pub prototype: String,
    pub type_arguments: Vec<Type>,
    pub contextual_type_arguments: TypeArguments,
    pub base: Option<ClassId>,
    pub fields: Vec<Field>,
    pub methods: HashMap<String, FunctionDeclaration>,
    pub getters: HashMap<String, FunctionDeclaration>,
    pub setters: HashMap<String, FunctionDeclaration>,
    pub constructor: Option<FunctionDeclaration>,
    pub index_get: Option<FunctionDeclaration>,
    pub index_set: Option<FunctionDeclaration>,
    /// Instance payload size in bytes.
    pub size: u32,
}

/// A concrete function produced by applying type arguments to a prototype.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionInstance {
    pub name: String,
    pub prototype: String,
    pub signature: Signature,
    pub declaration: FunctionDeclaration,
    pub flags: ElementFlags,
    pub this_class: Option<ClassId>,
    pub type_arguments: TypeArguments,
}

#[derive(Debug)]
pub struct Program {
    pub sources: Vec<Source>,
    pub elements: HashMap<String, Element>,
    /// Export name → internal element name, for every top-level export.
    pub exports: HashMap<String, String>,
    pub target: Target,
    classes: Vec<Class>,
    class_ids: HashMap<String, ClassId>,
    signatures: Vec<Signature>,
    /// Problems found while registering declarations, surfaced as
    /// diagnostics when compilation starts.
    pub(crate) registration_errors: Vec<String>,
}

impl Program {
    pub fn new(sources: Vec<Source>, target: Target) -> Program {
        let mut program = Program {
            sources,
            elements: HashMap::new(),
            exports: HashMap::new(),
            target,
            classes: Vec::new(),
            class_ids: HashMap::new(),
            signatures: Vec::new(),
            registration_errors: Vec::new(),
        };
        program.register_builtins();
        let sources = std::mem::take(&mut program.sources);
        for source in &sources {
            program.register_statements(&source.statements, None, &source.normalized_path);
        }
        program.sources = sources;
        program
    }

    fn register_builtins(&mut self) {
        let builtins: [(&str, Vec<&str>, Vec<(&str, TypeNode)>, TypeNode); 5] = [
            (
                "assert",
                vec![],
                vec![("condition", TypeNode::named("bool"))],
                TypeNode::named("void"),
            ),
            ("unreachable", vec![], vec![], TypeNode::named("void")),
            ("sizeof", vec!["T"], vec![], TypeNode::named("usize")),
            (
                "load",
                vec!["T"],
                vec![("ptr", TypeNode::named("usize"))],
                TypeNode::named("T"),
            ),
            (
                "store",
                vec!["T"],
                vec![
                    ("ptr", TypeNode::named("usize")),
                    ("value", TypeNode::named("T")),
                ],
                TypeNode::named("void"),
            ),
        ];
        for (name, type_parameters, parameters, return_type) in builtins {
            let declaration = FunctionDeclaration {
                name: name.to_string(),
                modifiers: Modifiers::DECLARE,
                type_parameters: type_parameters.iter().map(|s| s.to_string()).collect(),
                parameters: parameters
                    .into_iter()
                    .map(|(pname, node)| ParameterDeclaration {
                        name: pname.to_string(),
                        type_node: node,
                        initializer: None,
                        is_rest: false,
                    })
                    .collect(),
                return_type: Some(return_type),
                body: None,
            };
            self.elements.insert(
                name.to_string(),
                Element::FunctionPrototype(FunctionPrototype {
                    name: name.to_string(),
                    flags: ElementFlags::BUILTIN.with(ElementFlags::DECLARED),
                    declaration,
                    class_prototype: None,
                }),
            );
        }
    }

    fn register(&mut self, name: String, element: Element) {
        if self.elements.contains_key(&name) {
            self.registration_errors
                .push(format!("duplicate declaration of `{name}`"));
            return;
        }
        self.elements.insert(name, element);
    }

    fn register_statements(&mut self, statements: &[Statement], prefix: Option<&str>, source_path: &str) {
        for statement in statements {
            self.register_statement(statement, prefix, source_path);
        }
    }

    fn qualified(prefix: Option<&str>, name: &str) -> String {
        match prefix {
            Some(prefix) => format!("{prefix}.{name}"),
            None => name.to_string(),
        }
    }

    fn element_flags(modifiers: Modifiers, top_level: bool) -> ElementFlags {
        let mut flags = ElementFlags::NONE;
        if modifiers.has(Modifiers::EXPORT) {
            flags = flags.with(ElementFlags::EXPORTED);
        }
        if modifiers.has(Modifiers::DECLARE) {
            flags = flags.with(ElementFlags::DECLARED);
        }
        if modifiers.has(Modifiers::CONST) {
            flags = flags.with(ElementFlags::CONSTANT);
        }
        if top_level {
            flags = flags.with(ElementFlags::TOP_LEVEL);
        }
        flags
    }

    fn register_statement(&mut self, statement: &Statement, prefix: Option<&str>, source_path: &str) {
        let top_level = prefix.is_none();
        match statement {
            Statement::Function(declaration) => {
                let name = Self::qualified(prefix, &declaration.name);
                let mut flags = Self::element_flags(declaration.modifiers, top_level);
                if !declaration.type_parameters.is_empty() {
                    flags = flags.with(ElementFlags::GENERIC);
                }
                if top_level && declaration.modifiers.has(Modifiers::EXPORT) {
                    self.exports.insert(declaration.name.clone(), name.clone());
                }
                self.register(
                    name.clone(),
                    Element::FunctionPrototype(FunctionPrototype {
                        name,
                        flags,
                        declaration: declaration.clone(),
                        class_prototype: None,
                    }),
                );
            }
            Statement::Variable(variable) => {
                for declaration in &variable.declarations {
                    let name = Self::qualified(prefix, &declaration.name);
                    let flags = Self::element_flags(variable.modifiers, top_level);
                    if top_level && variable.modifiers.has(Modifiers::EXPORT) {
                        self.exports.insert(declaration.name.clone(), name.clone());
                    }
                    self.register(
                        name.clone(),
                        Element::Global(Global {
                            name,
                            flags,
                            type_node: declaration.type_node.clone(),
                            initializer: declaration.initializer.clone(),
                            source_path: source_path.to_string(),
                        }),
                    );
                }
            }
            Statement::Enum(declaration) => {
                let name = Self::qualified(prefix, &declaration.name);
                let flags = Self::element_flags(declaration.modifiers, top_level);
                if top_level && declaration.modifiers.has(Modifiers::EXPORT) {
                    self.exports.insert(declaration.name.clone(), name.clone());
                }
                self.register(
                    name.clone(),
                    Element::Enum(Enum {
                        name,
                        flags,
                        values: declaration.values.clone(),
                    }),
                );
            }
            Statement::Class(declaration) => {
                let name = Self::qualified(prefix, &declaration.name);
                let mut flags = Self::element_flags(declaration.modifiers, top_level);
                if !declaration.type_parameters.is_empty() {
                    flags = flags.with(ElementFlags::GENERIC);
                }
                if top_level && declaration.modifiers.has(Modifiers::EXPORT) {
                    self.exports.insert(declaration.name.clone(), name.clone());
                }
                // Static members live beside the class as ordinary elements.
                for member in &declaration.members {
                    match member {
                        ClassMember::Field(field) if field.modifiers.has(Modifiers::STATIC) => {
                            let static_name = format!("{}.{}", name, field.name);
                            self.register(
                                static_name.clone(),
                                Element::Global(Global {
                                    name: static_name,
                                    flags: Self::element_flags(field.modifiers, false)
                                        .with(ElementFlags::STATIC),
                                    type_node: Some(field.type_node.clone()),
                                    initializer: field.initializer.clone(),
                                    source_path: source_path.to_string(),
                                }),
                            );
                        }
                        ClassMember::Method(method)
                            if method.declaration.modifiers.has(Modifiers::STATIC) =>
                        {
                            let static_name = format!("{}.{}", name, method.declaration.name);
                            self.register(
                                static_name.clone(),
                                Element::FunctionPrototype(FunctionPrototype {
                                    name: static_name,
                                    flags: Self::element_flags(method.declaration.modifiers, false)
                                        .with(ElementFlags::STATIC),
                                    declaration: method.declaration.clone(),
                                    class_prototype: None,
                                }),
                            );
                        }
                        _ => {}
                    }
                }
                self.register(
                    name.clone(),
                    Element::ClassPrototype(ClassPrototype {
                        name,
                        flags,
                        declaration: declaration.clone(),
                    }),
                );
            }
            Statement::Namespace(declaration) => {
                let name = Self::qualified(prefix, &declaration.name);
                let flags = Self::element_flags(declaration.modifiers, top_level);
                self.register(
                    name.clone(),
                    Element::Namespace(Namespace {
                        name: name.clone(),
                        flags,
                    }),
                );
                self.register_statements(&declaration.members, Some(&name), source_path);
            }
            _ => {}
        }
    }

    // ---- resolver surface -------------------------------------------------

    /// Resolve an identifier to an element, trying the innermost namespace
    /// first, then enclosing namespaces, then the global scope.
    pub fn resolve_identifier(&self, name: &str, namespace: Option<&str>) -> Option<&Element> {
        if let Some(mut scope) = namespace {
            loop {
                let qualified = format!("{scope}.{name}");
                if let Some(element) = self.elements.get(&qualified) {
                    return Some(element);
                }
                match scope.rfind('.') {
                    Some(dot) => scope = &scope[..dot],
                    None => break,
                }
            }
        }
        self.elements.get(name)
    }

    /// Resolve a type annotation to a concrete type. Reports failures by
    /// returning an error message; the caller owns the diagnostic.
    pub fn resolve_type(
        &mut self,
        node: &TypeNode,
        context: Option<&TypeArguments>,
    ) -> Result<Type, String> {
        match node {
            TypeNode::Named { name, arguments } => {
                if let Some(context) = context {
                    if let Some(ty) = context.get(name) {
                        if !arguments.is_empty() {
                            return Err(format!("type parameter `{name}` cannot be parameterized"));
                        }
                        return Ok(ty.clone());
                    }
                }
                if let Some(kind) = basic_type_kind(name) {
                    if !arguments.is_empty() {
                        return Err(format!("basic type `{name}` cannot be parameterized"));
                    }
                    return Ok(Type::new(kind));
                }
                if name == "string" {
                    return Ok(self.string_type());
                }
                match self.elements.get(name.as_str()).cloned() {
                    Some(Element::Enum(_)) => Ok(Type::i32()),
                    Some(Element::ClassPrototype(prototype)) => {
                        let mut resolved_args = Vec::with_capacity(arguments.len());
                        for argument in arguments {
                            resolved_args.push(self.resolve_type(argument, context)?);
                        }
                        let id = self.ensure_class(&prototype.name, &resolved_args)?;
                        Ok(Type::class_reference(id))
                    }
                    _ => Err(format!("unresolvable type `{name}`")),
                }
            }
            TypeNode::Function {
                parameters,
                return_type,
            } => {
                let mut parameter_types = Vec::with_capacity(parameters.len());
                for parameter in parameters {
                    parameter_types.push(self.resolve_type(parameter, context)?);
                }
                let return_type = self.resolve_type(return_type, context)?;
                let required_parameters = parameter_types.len();
                let id = self.intern_signature(Signature {
                    parameter_types,
                    this_type: None,
                    return_type,
                    required_parameters,
                    has_rest: false,
                });
                Ok(Type::function_reference(id))
            }
        }
    }

    /// The `string` type: the declared `String` class if present, pointer
    /// width otherwise.
    pub fn string_type(&mut self) -> Type {
        if matches!(self.elements.get("String"), Some(Element::ClassPrototype(p)) if p.declaration.type_parameters.is_empty())
        {
            if let Ok(id) = self.ensure_class("String", &[]) {
                return Type::class_reference(id);
            }
        }
        Type::usize()
    }

    pub fn intern_signature(&mut self, signature: Signature) -> SignatureId {
        if let Some(index) = self.signatures.iter().position(|s| *s == signature) {
            return SignatureId(index);
        }
        let id = SignatureId(self.signatures.len());
        self.signatures.push(signature);
        id
    }

    pub fn signature(&self, id: SignatureId) -> &Signature {
        &self.signatures[id.0]
    }

    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.0]
    }

    pub fn class_by_name(&self, name: &str) -> Option<&Class> {
        self.class_ids.get(name).map(|id| &self.classes[id.0])
    }

    /// Display name of a type, used to derive instance names.
    pub fn type_name(&self, ty: &Type) -> String {
        if let Some(id) = ty.class {
            return self.classes[id.0].name.clone();
        }
        if ty.signature.is_some() {
            return "fn".to_string();
        }
        match ty.kind {
            TypeKind::I8 => "i8",
            TypeKind::I16 => "i16",
            TypeKind::I32 => "i32",
            TypeKind::I64 => "i64",
            TypeKind::Isize => "isize",
            TypeKind::U8 => "u8",
            TypeKind::U16 => "u16",
            TypeKind::U32 => "u32",
            TypeKind::U64 => "u64",
            TypeKind::Usize => "usize",
            TypeKind::Bool => "bool",
            TypeKind::F32 => "f32",
            TypeKind::F64 => "f64",
            TypeKind::Void => "void",
        }
        .to_string()
    }

    fn instance_name(&self, base: &str, type_arguments: &[Type]) -> String {
        if type_arguments.is_empty() {
            return base.to_string();
        }
        let arguments: Vec<String> = type_arguments.iter().map(|t| self.type_name(t)).collect();
        format!("{}<{}>", base, arguments.join(","))
    }

    /// Materialize a concrete class from a prototype and type arguments,
    /// computing the field layout. Repeated applications return the cached
    /// arena entry.
    pub fn ensure_class(
        &mut self,
        prototype_name: &str,
        type_arguments: &[Type],
    ) -> Result<ClassId, String> {
        let prototype = match self.elements.get(prototype_name) {
            Some(Element::ClassPrototype(prototype)) => prototype.clone(),
            _ => return Err(format!("`{prototype_name}` is not a class")),
        };
        let declaration = &prototype.declaration;
        if declaration.type_parameters.len() != type_arguments.len() {
            return Err(format!(
                "class `{}` expects {} type argument(s), got {}",
                prototype_name,
                declaration.type_parameters.len(),
                type_arguments.len()
            ));
        }
        let name = self.instance_name(prototype_name, type_arguments);
        if let Some(&id) = self.class_ids.get(&name) {
            return Ok(id);
        }

        let mut context = TypeArguments::new();
        for (parameter, argument) in declaration.type_parameters.iter().zip(type_arguments) {
            context.insert(parameter.clone(), argument.clone());
        }

        // Reserve the arena slot first so self-referential fields resolve.
        let id = ClassId(self.classes.len());
        self.classes.push(Class {
            id,
            name: name.clone(),
            prototype: prototype_name.to_string(),
            type_arguments: type_arguments.to_vec(),
            contextual_type_arguments: context.clone(),
            base: None,
            fields: Vec::new(),
            methods: HashMap::new(),
            getters: HashMap::new(),
            setters: HashMap::new(),
            constructor: None,
            index_get: None,
            index_set: None,
            size: 0,
        });
        self.class_ids.insert(name, id);

        let base = match &declaration.extends {
            Some(node) => {
                let base_type = self.resolve_type(node, Some(&context))?;
                match base_type.class {
                    Some(base_id) => Some(base_id),
                    None => return Err(format!("`{prototype_name}` extends a non-class type")),
                }
            }
            None => None,
        };

        let mut offset = base.map(|b| self.classes[b.0].size).unwrap_or(0);
        let mut fields = Vec::new();
        let mut methods = HashMap::new();
        let mut getters = HashMap::new();
        let mut setters = HashMap::new();
        let mut constructor = None;
        let mut index_get = None;
        let mut index_set = None;

        for member in &declaration.members {
            match member {
                ClassMember::Field(field) => {
                    if field.modifiers.has(Modifiers::STATIC) {
                        continue;
                    }
                    let ty = self.resolve_type(&field.type_node, Some(&context))?;
                    let size = ty.byte_size(self.target).max(1);
                    offset = align_up(offset, size);
                    fields.push(Field {
                        name: field.name.clone(),
                        ty,
                        offset,
                        readonly: field.modifiers.has(Modifiers::READONLY),
                        initializer: field.initializer.clone(),
                    });
                    offset += size;
                }
                ClassMember::Method(method) => {
                    if method.declaration.modifiers.has(Modifiers::STATIC) {
                        continue;
                    }
                    match method.kind {
                        MethodKind::Normal => {
                            methods
                                .insert(method.declaration.name.clone(), method.declaration.clone());
                        }
                        MethodKind::Constructor => constructor = Some(method.declaration.clone()),
                        MethodKind::Getter => {
                            getters
                                .insert(method.declaration.name.clone(), method.declaration.clone());
                        }
                        MethodKind::Setter => {
                            setters
                                .insert(method.declaration.name.clone(), method.declaration.clone());
                        }
                        MethodKind::IndexGet => index_get = Some(method.declaration.clone()),
                        MethodKind::IndexSet => index_set = Some(method.declaration.clone()),
                    }
                }
            }
        }

        let class = &mut self.classes[id.0];
        class.base = base;
        class.fields = fields;
        class.methods = methods;
        class.getters = getters;
        class.setters = setters;
        class.constructor = constructor;
        class.index_get = index_get;
        class.index_set = index_set;
        class.size = offset;
        Ok(id)
    }

    pub fn lookup_field(&self, class: ClassId, name: &str) -> Option<&Field> {
        let mut current = Some(class);
        while let Some(id) = current {
            let class = &self.classes[id.0];
            if let Some(field) = class.fields.iter().find(|f| f.name == name) {
                return Some(field);
            }
            current = class.base;
        }
        None
    }

    pub fn lookup_method(&self, class: ClassId, name: &str) -> Option<(ClassId, &FunctionDeclaration)> {
        let mut current = Some(class);
        while let Some(id) = current {
            let class = &self.classes[id.0];
            if let Some(declaration) = class.methods.get(name) {
                return Some((id, declaration));
            }
            current = class.base;
        }
        None
    }

    pub fn lookup_getter(&self, class: ClassId, name: &str) -> Option<(ClassId, &FunctionDeclaration)> {
        let mut current = Some(class);
        while let Some(id) = current {
            let class = &self.classes[id.0];
            if let Some(declaration) = class.getters.get(name) {
                return Some((id, declaration));
            }
            current = class.base;
        }
        None
    }

    pub fn lookup_setter(&self, class: ClassId, name: &str) -> Option<(ClassId, &FunctionDeclaration)> {
        let mut current = Some(class);
        while let Some(id) = current {
            let class = &self.classes[id.0];
            if let Some(declaration) = class.setters.get(name) {
                return Some((id, declaration));
            }
            current = class.base;
        }
        None
    }

    pub fn lookup_index_get(&self, class: ClassId) -> Option<(ClassId, &FunctionDeclaration)> {
        let mut current = Some(class);
        while let Some(id) = current {
            let class = &self.classes[id.0];
            if let Some(declaration) = &class.index_get {
                return Some((id, declaration));
            }
            current = class.base;
        }
        None
    }

    pub fn lookup_index_set(&self, class: ClassId) -> Option<(ClassId, &FunctionDeclaration)> {
        let mut current = Some(class);
        while let Some(id) = current {
            let class = &self.classes[id.0];
            if let Some(declaration) = &class.index_set {
                return Some((id, declaration));
            }
            current = class.base;
        }
        None
    }

    /// Apply type arguments to a function prototype, producing the concrete
    /// instance the compiler emits. The same application always yields the
    /// same internal name, so instances compile exactly once.
    pub fn resolve_prototype(
        &mut self,
        prototype: &FunctionPrototype,
        type_arguments: &[Type],
        this_class: Option<ClassId>,
        method_name_prefix: Option<&str>,
    ) -> Result<FunctionInstance, String> {
        let declaration = &prototype.declaration;
        if declaration.type_parameters.len() != type_arguments.len() {
            return Err(format!(
                "function `{}` expects {} type argument(s), got {}",
                prototype.name,
                declaration.type_parameters.len(),
                type_arguments.len()
            ));
        }
        let mut context = this_class
            .map(|id| self.classes[id.0].contextual_type_arguments.clone())
            .unwrap_or_default();
        for (parameter, argument) in declaration.type_parameters.iter().zip(type_arguments) {
            context.insert(parameter.clone(), argument.clone());
        }

        let mut parameter_types = Vec::with_capacity(declaration.parameters.len());
        let mut required_parameters = 0;
        let mut seen_optional = false;
        let mut has_rest = false;
        for parameter in &declaration.parameters {
            parameter_types.push(self.resolve_type(&parameter.type_node, Some(&context))?);
            if parameter.is_rest {
                has_rest = true;
            }
            if parameter.initializer.is_some() {
                seen_optional = true;
            } else if !seen_optional {
                required_parameters += 1;
            }
        }
        let return_type = match &declaration.return_type {
            Some(node) => self.resolve_type(node, Some(&context))?,
            None => Type::void(),
        };
        let this_type = this_class.map(Type::class_reference);

        let base_name = match (this_class, method_name_prefix) {
            (Some(id), _) => format!("{}#{}", self.classes[id.0].name, declaration.name),
            (None, Some(prefix)) => format!("{}#{}", prefix, declaration.name),
            (None, None) => prototype.name.clone(),
        };
        let name = self.instance_name(&base_name, type_arguments);

        Ok(FunctionInstance {
            name,
            prototype: prototype.name.clone(),
            signature: Signature {
                parameter_types,
                this_type,
                return_type,
                required_parameters,
                has_rest,
            },
            declaration: declaration.clone(),
            flags: prototype.flags,
            this_class,
            type_arguments: context,
        })
    }
}

fn basic_type_kind(name: &str) -> Option<TypeKind> {
    Some(match name {
        "i8" => TypeKind::I8,
        "i16" => TypeKind::I16,
        "i32" => TypeKind::I32,
        "i64" => TypeKind::I64,
        "isize" => TypeKind::Isize,
        "u8" => TypeKind::U8,
        "u16" => TypeKind::U16,
        "u32" => TypeKind::U32,
        "u64" => TypeKind::U64,
        "usize" => TypeKind::Usize,
        "bool" => TypeKind::Bool,
        "f32" => TypeKind::F32,
        "f64" => TypeKind::F64,
        "void" => TypeKind::Void,
        _ => return None,
    })
}

fn align_up(offset: u32, alignment: u32) -> u32 {
    (offset + alignment - 1) / alignment * alignment
}
