//! Packaging of compiled functions into a bytecode module.
//!
//! Lowering produces a [`LinkObject`]: an indexed soup of member
//! definitions, unresolved uses of module-scope IR members, compiled
//! functions with their patch sites, and record schemas. The linker orders
//! the definitions canonically, renames every reference, patches function
//! code in place and emits the final [`Module`].

use std::cmp::Ordering;
use std::collections::HashMap;

use itertools::Itertools;
use thiserror::Error;
use tracing::debug;

use vela_bytecode::{
    consts::MAX_MODULE_SIZE, Function as BcFunction, FunctionId, FunctionKind, Member, MemberId,
    MemberKind, Module, RecordSchema, RecordSchemaId,
};
use vela_types::{BinaryWriter, Str, StringTable};

use crate::builder::ModuleRefs;
use crate::ir::{IrMemberId, ModuleIr, ModuleMemberData};
use crate::lower::compile_function;

/// Failure produced while linking a module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// A compiled function references a module member that no compilation
    /// unit defined.
    #[error("module member '{name}' was never defined")]
    UnresolvedUse {
        /// Name of the missing member.
        name: String,
    },
    /// Two exports share one symbol.
    #[error("duplicate export of symbol member {symbol}")]
    DuplicateExport {
        /// The twice-exported symbol member.
        symbol: MemberId,
    },
    /// The member table exceeds the verifier's module size cap.
    #[error("module has too many members ({count}, maximum is {MAX_MODULE_SIZE})")]
    TooManyMembers {
        /// Number of members produced by linking.
        count: usize,
    },
}

/// One entry of a [`LinkObject`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LinkItem {
    /// A member of the final module.
    Definition {
        /// The module-scope IR member this definition realizes, if any.
        /// Uses of that IR member resolve to this definition.
        ir_id: Option<IrMemberId>,
        /// The member value. Member references inside it are in
        /// object-item space until the linker renames them.
        value: Member,
    },
    /// A reference to a module-scope IR member that some other definition
    /// provides. Resolved by the linker.
    Use {
        /// The referenced IR member.
        target: IrMemberId,
    },
}

/// A lowered function together with its member reference patch sites.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub(crate) function: BcFunction,
    pub(crate) refs: ModuleRefs,
}

impl CompiledFunction {
    /// The lowered bytecode function.
    pub fn function(&self) -> &BcFunction {
        &self.function
    }

    /// Byte positions in the function's code that reference link items,
    /// with the referenced item.
    pub fn refs(&self) -> &[(u32, MemberId)] {
        &self.refs
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
enum DedupKey {
    Integer(i64),
    // Bit pattern; distinguishes 0.0 from -0.0 and keeps NaNs stable.
    Float(u64),
    String(Str),
    Symbol(Str),
    Use(IrMemberId),
    Schema(Vec<MemberId>),
}

/// The per-compilation-unit artifact between lowering and linking.
///
/// Item ids are [`MemberId`]s in *object space*: instructions emitted
/// during lowering embed them as operands, and the linker rewrites them
/// into final module ids. Constant definitions (integers, floats,
/// strings, symbols, schemas) and uses are deduplicated on insertion.
#[derive(Debug, Default)]
pub struct LinkObject {
    items: Vec<LinkItem>,
    functions: Vec<CompiledFunction>,
    schemas: Vec<RecordSchema>,
    exports: Vec<(MemberId, MemberId)>,
    dedup: HashMap<DedupKey, MemberId>,
}

impl LinkObject {
    /// Creates an empty object.
    pub fn new() -> Self {
        Self::default()
    }

    fn push_item(&mut self, item: LinkItem) -> MemberId {
        let id = MemberId::new(self.items.len() as u32);
        self.items.push(item);
        id
    }

    fn define_deduped(&mut self, key: DedupKey, value: Member) -> MemberId {
        if let Some(&id) = self.dedup.get(&key) {
            return id;
        }
        let id = self.push_item(LinkItem::Definition { ir_id: None, value });
        self.dedup.insert(key, id);
        id
    }

    /// Defines a member with optional IR provenance. Not deduplicated.
    pub fn define(&mut self, ir_id: Option<IrMemberId>, value: Member) -> MemberId {
        self.push_item(LinkItem::Definition { ir_id, value })
    }

    /// Defines (or reuses) an integer constant member.
    pub fn define_integer(&mut self, value: i64) -> MemberId {
        self.define_deduped(DedupKey::Integer(value), Member::Integer(value))
    }

    /// Defines (or reuses) a float constant member.
    pub fn define_float(&mut self, value: f64) -> MemberId {
        self.define_deduped(DedupKey::Float(value.to_bits()), Member::Float(value))
    }

    /// Defines (or reuses) a string constant member.
    pub fn define_string(&mut self, value: Str) -> MemberId {
        self.define_deduped(DedupKey::String(value), Member::String(value))
    }

    /// Defines (or reuses) a symbol member named by `name`, together with
    /// its string constant.
    pub fn define_symbol(&mut self, name: Str) -> MemberId {
        if let Some(&id) = self.dedup.get(&DedupKey::Symbol(name)) {
            return id;
        }
        let string = self.define_string(name);
        let id = self.push_item(LinkItem::Definition {
            ir_id: None,
            value: Member::Symbol { name: string },
        });
        self.dedup.insert(DedupKey::Symbol(name), id);
        id
    }

    /// References the definition that will realize the given IR member.
    pub fn use_member(&mut self, target: IrMemberId) -> MemberId {
        if let Some(&id) = self.dedup.get(&DedupKey::Use(target)) {
            return id;
        }
        let id = self.push_item(LinkItem::Use { target });
        self.dedup.insert(DedupKey::Use(target), id);
        id
    }

    /// Defines (or reuses) a record schema member over the given field
    /// names, together with one symbol member per name.
    pub fn define_schema(&mut self, keys: &[Str]) -> MemberId {
        let symbols: Vec<MemberId> = keys.iter().map(|&key| self.define_symbol(key)).collect();
        if let Some(&id) = self.dedup.get(&DedupKey::Schema(symbols.clone())) {
            return id;
        }

        let schema_id = RecordSchemaId::new(self.schemas.len() as u32);
        self.schemas.push(RecordSchema::new(symbols.clone()));
        let id = self.push_item(LinkItem::Definition {
            ir_id: None,
            value: Member::RecordSchema(schema_id),
        });
        self.dedup.insert(DedupKey::Schema(symbols), id);
        id
    }

    /// Adds a compiled function to the object's function table.
    pub fn add_function(&mut self, compiled: CompiledFunction) -> FunctionId {
        let id = FunctionId::new(self.functions.len() as u32);
        self.functions.push(compiled);
        id
    }

    /// Adds an export pair; both sides are object item ids.
    pub fn add_export(&mut self, symbol: MemberId, value: MemberId) {
        self.exports.push((symbol, value));
    }

    /// The item with the given id.
    pub fn item(&self, id: MemberId) -> &LinkItem {
        &self.items[id.to_usize()]
    }

    /// Iterates over all item ids.
    pub fn item_ids(&self) -> impl Iterator<Item = MemberId> {
        (0..self.items.len() as u32).map(MemberId::new)
    }

    /// The compiled function with the given id.
    pub fn function(&self, id: FunctionId) -> &CompiledFunction {
        &self.functions[id.to_usize()]
    }

    /// The record schema with the given id.
    pub fn schema(&self, id: RecordSchemaId) -> &RecordSchema {
        &self.schemas[id.to_usize()]
    }

    /// Merges another object into this one, rebasing its item, function
    /// and schema ids. Deduplication does not run across objects.
    pub fn merge(&mut self, other: LinkObject) {
        let item_base = self.items.len() as u32;
        let function_base = self.functions.len() as u32;
        let schema_base = self.schemas.len() as u32;

        let rebase_item = |id: MemberId| MemberId::new(id.to_u32() + item_base);

        for item in other.items {
            let rebased = match item {
                LinkItem::Use { target } => LinkItem::Use { target },
                LinkItem::Definition { ir_id, value } => {
                    let value = match value {
                        Member::Integer(_) | Member::Float(_) | Member::String(_) => value,
                        Member::Symbol { name } => Member::Symbol {
                            name: rebase_item(name),
                        },
                        Member::Import { module_name } => Member::Import {
                            module_name: rebase_item(module_name),
                        },
                        Member::Variable { name } => Member::Variable {
                            name: rebase_item(name),
                        },
                        Member::Function(id) => {
                            Member::Function(FunctionId::new(id.to_u32() + function_base))
                        }
                        Member::RecordSchema(id) => {
                            Member::RecordSchema(RecordSchemaId::new(id.to_u32() + schema_base))
                        }
                    };
                    LinkItem::Definition { ir_id, value }
                }
            };
            self.items.push(rebased);
        }

        for mut compiled in other.functions {
            if let Some(name) = compiled.function.name() {
                compiled.function.set_name(Some(rebase_item(name)));
            }
            for (_, item) in &mut compiled.refs {
                *item = rebase_item(*item);
            }
            self.functions.push(compiled);
        }

        for mut schema in other.schemas {
            for key in schema.keys_mut() {
                *key = rebase_item(*key);
            }
            self.schemas.push(schema);
        }

        for (symbol, value) in other.exports {
            self.exports.push((rebase_item(symbol), rebase_item(value)));
        }
    }
}

/// Lowers every function of the IR module and packages the results into a
/// link object.
pub fn compile_object(module: &ModuleIr) -> LinkObject {
    let mut object = LinkObject::new();

    for (ir_id, member) in module.members() {
        let item = match &member.data {
            ModuleMemberData::Import => {
                let module_name = object.define_string(member.name);
                object.define(Some(ir_id), Member::Import { module_name })
            }
            ModuleMemberData::Variable => {
                let name = object.define_string(member.name);
                object.define(Some(ir_id), Member::Variable { name })
            }
            ModuleMemberData::Function(func) => {
                let compiled = compile_function(func, &mut object);
                let function_id = object.add_function(compiled);
                object.define(Some(ir_id), Member::Function(function_id))
            }
        };

        if member.exported {
            let symbol = object.define_symbol(member.name);
            object.add_export(symbol, item);
        }
    }

    object
}

/// Compiles and links `module` into its final bytecode form.
pub fn compile_module(module: &ModuleIr) -> Result<Module, LinkError> {
    link(compile_object(module), module)
}

/// Links several objects by merging them in order; the final member
/// ordering is independent of the split because of the canonical sort.
pub fn link_objects(
    objects: impl IntoIterator<Item = LinkObject>,
    module: &ModuleIr,
) -> Result<Module, LinkError> {
    let mut merged = LinkObject::new();
    for object in objects {
        merged.merge(object);
    }
    link(merged, module)
}

/// Links one object into the final module.
pub fn link(mut object: LinkObject, module: &ModuleIr) -> Result<Module, LinkError> {
    debug!(
        items = object.items.len(),
        functions = object.functions.len(),
        "linking module"
    );

    // Definitions are assigned new dense ids in canonical order; uses
    // disappear, they resolve through the definitions' provenance.
    let mut order: Vec<MemberId> = object
        .item_ids()
        .filter(|&id| matches!(object.item(id), LinkItem::Definition { .. }))
        .collect();
    order.sort_by(|&l, &r| canonical_order(l, r, &object, module.strings()));

    if order.len() > MAX_MODULE_SIZE {
        return Err(LinkError::TooManyMembers { count: order.len() });
    }

    let mut renamed: HashMap<MemberId, MemberId> = HashMap::new();
    let mut defs: HashMap<IrMemberId, MemberId> = HashMap::new();
    let mut final_members: Vec<Member> = Vec::with_capacity(order.len());
    for (index, &old_id) in order.iter().enumerate() {
        let new_id = MemberId::new(index as u32);
        let LinkItem::Definition { ir_id, value } = object.item(old_id) else {
            unreachable!("order contains definitions only");
        };
        if let Some(ir_id) = ir_id {
            defs.insert(*ir_id, new_id);
        }
        renamed.insert(old_id, new_id);
        final_members.push(*value);
    }

    let rename =
        |id: MemberId| -> MemberId { renamed[&id] };

    // Rewrite member cross references into the new id space. Schema keys
    // are sorted afterwards, which canonicalizes structurally equal
    // records.
    for member in &mut final_members {
        match member {
            Member::Integer(_) | Member::Float(_) | Member::String(_) | Member::Function(_) => {}
            Member::Symbol { name } | Member::Variable { name } => *name = rename(*name),
            Member::Import { module_name } => *module_name = rename(*module_name),
            Member::RecordSchema(schema_id) => {
                let schema = &mut object.schemas[schema_id.to_usize()];
                for key in schema.keys_mut() {
                    *key = rename(*key);
                }
                schema.keys_mut().sort();
            }
        }
    }

    // Patch the member reference slots inside every function's code.
    for index in 0..object.functions.len() {
        let refs = std::mem::take(&mut object.functions[index].refs);
        let mut resolved = Vec::with_capacity(refs.len());
        for (offset, item_id) in refs {
            let new_id = match object.item(item_id) {
                LinkItem::Definition { .. } => rename(item_id),
                LinkItem::Use { target } => {
                    *defs.get(target).ok_or_else(|| LinkError::UnresolvedUse {
                        name: module.strings().value(module.member(*target).name).to_owned(),
                    })?
                }
            };
            resolved.push((offset, new_id));
        }

        let function = &mut object.functions[index].function;
        if let Some(name) = function.name() {
            function.set_name(Some(rename(name)));
        }
        let mut writer = BinaryWriter::new(function.code_mut());
        for (offset, new_id) in resolved {
            writer.overwrite_u32(offset as usize, new_id.to_u32());
        }
    }

    let mut result = Module::new();

    // Strings move from the compiler's table into the module's own table,
    // interned on first occurrence.
    let mut string_map: HashMap<Str, Str> = HashMap::new();
    let mut result_str = |strings: &mut StringTable, value: Str| -> Str {
        *string_map
            .entry(value)
            .or_insert_with(|| strings.intern(module.strings().value(value)))
    };

    let name = result_str(result.strings_mut(), module.name());
    result.set_name(name);

    for mut member in final_members {
        if let Member::String(value) = &mut member {
            *value = result_str(result.strings_mut(), *value);
        }
        result.push_member(member);
    }

    let mut exports: Vec<(MemberId, MemberId)> = object
        .exports
        .iter()
        .map(|&(symbol, value)| (rename(symbol), rename(value)))
        .collect();
    exports.sort_by_key(|&(symbol, _)| symbol);
    if let Some((&(symbol, _), _)) = exports
        .iter()
        .tuple_windows()
        .find(|(&(a, _), &(b, _))| a == b)
    {
        return Err(LinkError::DuplicateExport { symbol });
    }
    for (symbol, value) in exports {
        debug_assert_eq!(
            result.member(symbol).map(Member::kind),
            Some(MemberKind::Symbol),
            "the exported name must be a symbol value"
        );
        result.add_export(symbol, value);
    }

    // Functions and record schemas keep their ids; the member table
    // already references them by the same indices.
    for compiled in object.functions.drain(..) {
        result.push_function(compiled.function);
    }
    for schema in object.schemas.drain(..) {
        result.push_schema(schema);
    }

    if let Some(ir_init) = module.init() {
        let init = *defs.get(&ir_init).ok_or_else(|| LinkError::UnresolvedUse {
            name: module.strings().value(module.member(ir_init).name).to_owned(),
        })?;
        result.set_init(init);
    }

    Ok(result)
}


fn function_kind_order(kind: FunctionKind) -> u8 {
    match kind {
        FunctionKind::Normal => 0,
        FunctionKind::Closure => 1,
    }
}

/// Total order over definitions: by member type, then by a type-specific
/// content comparison that recurses through member references. Ties are
/// broken by the stable sort, so insertion order is preserved for equal
/// elements (anonymous functions in particular).
fn canonical_order(
    lhs: MemberId,
    rhs: MemberId,
    object: &LinkObject,
    strings: &StringTable,
) -> Ordering {
    let value_of = |id: MemberId| -> &Member {
        match object.item(id) {
            LinkItem::Definition { value, .. } => value,
            LinkItem::Use { .. } => unreachable!("canonical order compares definitions"),
        }
    };

    let ld = value_of(lhs);
    let rd = value_of(rhs);

    ld.kind().cmp(&rd.kind()).then_with(|| match (ld, rd) {
        (Member::Integer(l), Member::Integer(r)) => l.cmp(r),
        (Member::Float(l), Member::Float(r)) => l.total_cmp(r),
        (Member::String(l), Member::String(r)) => strings.value(*l).cmp(strings.value(*r)),
        (Member::Symbol { name: l }, Member::Symbol { name: r })
        | (Member::Variable { name: l }, Member::Variable { name: r })
        | (
            Member::Import { module_name: l },
            Member::Import { module_name: r },
        ) => canonical_order(*l, *r, object, strings),
        (Member::RecordSchema(l), Member::RecordSchema(r)) => {
            let lk = object.schema(*l).keys();
            let rk = object.schema(*r).keys();
            for (&lkey, &rkey) in lk.iter().zip(rk.iter()) {
                let ordering = canonical_order(lkey, rkey, object, strings);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            lk.len().cmp(&rk.len())
        }
        (Member::Function(l), Member::Function(r)) => {
            let lf = &object.function(*l).function;
            let rf = &object.function(*r).function;

            // Normal functions before closures, named before anonymous.
            function_kind_order(lf.kind())
                .cmp(&function_kind_order(rf.kind()))
                .then_with(|| match (lf.name(), rf.name()) {
                    (Some(ln), Some(rn)) => canonical_order(ln, rn, object, strings),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                })
        }
        _ => unreachable!("member kinds were equal"),
    })
}
