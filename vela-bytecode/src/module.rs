use vela_types::{Str, StringTable};

use crate::{Function, FunctionId, Member, MemberId, RecordSchema, RecordSchemaId};

/// A compiled bytecode module, ready for verification and loading.
///
/// All tables are append-only during construction and frozen afterwards;
/// ids are dense indices into the respective table.
#[derive(Debug, Default, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Module {
    strings: StringTable,
    name: Option<Str>,
    init: Option<MemberId>,
    exports: Vec<(MemberId, MemberId)>,
    members: Vec<Member>,
    functions: Vec<Function>,
    schemas: Vec<RecordSchema>,
}

impl Module {
    /// Creates an empty module.
    pub fn new() -> Self {
        Self::default()
    }

    /// The module's private string table.
    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    /// Mutable access to the string table.
    pub fn strings_mut(&mut self) -> &mut StringTable {
        &mut self.strings
    }

    /// The module name.
    pub fn name(&self) -> Option<Str> {
        self.name
    }

    /// Sets the module name.
    pub fn set_name(&mut self, name: Str) {
        self.name = Some(name);
    }

    /// Member id of the initializer function, if there is one.
    pub fn init(&self) -> Option<MemberId> {
        self.init
    }

    /// Sets the initializer function member.
    pub fn set_init(&mut self, init: MemberId) {
        self.init = Some(init);
    }

    /// Adds an entry to the export set. `symbol` must reference a `Symbol`
    /// member naming the export, `value` the exported member.
    pub fn add_export(&mut self, symbol: MemberId, value: MemberId) {
        self.exports.push((symbol, value));
    }

    /// The exported `(symbol, value)` pairs, sorted by symbol.
    pub fn exports(&self) -> &[(MemberId, MemberId)] {
        &self.exports
    }

    /// Appends a member, returning its id.
    pub fn push_member(&mut self, member: Member) -> MemberId {
        let id = MemberId::new(self.members.len() as u32);
        self.members.push(member);
        id
    }

    /// Appends a function, returning its id.
    pub fn push_function(&mut self, function: Function) -> FunctionId {
        let id = FunctionId::new(self.functions.len() as u32);
        self.functions.push(function);
        id
    }

    /// Appends a record schema, returning its id.
    pub fn push_schema(&mut self, schema: RecordSchema) -> RecordSchemaId {
        let id = RecordSchemaId::new(self.schemas.len() as u32);
        self.schemas.push(schema);
        id
    }

    /// Returns the member with the given id.
    pub fn member(&self, id: MemberId) -> Option<&Member> {
        self.members.get(id.to_usize())
    }

    /// Returns the function with the given id.
    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get(id.to_usize())
    }

    /// Mutable access to a function (used by the linker for patching).
    pub fn function_mut(&mut self, id: FunctionId) -> Option<&mut Function> {
        self.functions.get_mut(id.to_usize())
    }

    /// Returns the record schema with the given id.
    pub fn schema(&self, id: RecordSchemaId) -> Option<&RecordSchema> {
        self.schemas.get(id.to_usize())
    }

    /// Iterates over all member ids in ascending order.
    pub fn member_ids(&self) -> impl Iterator<Item = MemberId> {
        (0..self.members.len() as u32).map(MemberId::new)
    }

    /// Iterates over all members with their ids.
    pub fn members(&self) -> impl Iterator<Item = (MemberId, &Member)> {
        self.members
            .iter()
            .enumerate()
            .map(|(i, m)| (MemberId::new(i as u32), m))
    }

    /// Number of members.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Number of functions.
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Number of record schemas.
    pub fn schema_count(&self) -> usize {
        self.schemas.len()
    }
}
