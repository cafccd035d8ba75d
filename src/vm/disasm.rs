use super::bytecode::{FunctionCode, Instruction as I, Module};
use std::fmt::{self, Write};

pub fn disassemble_module_to_string(module: &Module) -> String {
    let mut output = String::new();
    let _ = disassemble_module(module, &mut output);
    output
}

pub fn disassemble_module(module: &Module, w: &mut impl Write) -> fmt::Result {
    writeln!(
        w,
        "=== Module {} ({}) ===",
        module.name,
        if module.is_static { "static" } else { "dynamic" }
    )?;
    writeln!(w)?;

    writeln!(w, "Symbols ({}):", module.symbols.len())?;
    for (i, sym) in module.symbols.iter().enumerate() {
        writeln!(w, "  {}: \"{}\"", i, sym)?;
    }
    writeln!(w)?;

    writeln!(w, "Strings ({}):", module.string_pool.len())?;
    for (i, s) in module.string_pool.iter().enumerate() {
        writeln!(w, "  {}: {:?}", i, s)?;
    }
    writeln!(w)?;

    writeln!(w, "Classes ({}):", module.classes.len())?;
    for (i, cls) in module.classes.iter().enumerate() {
        writeln!(w, "  {}: {}", i, cls.qualname)?;
        for (off, (name, ty)) in cls.fields.iter().enumerate() {
            writeln!(w, "      field {}: {}: {}", off, name, ty)?;
        }
        for (slot, name) in cls.vtable.iter().enumerate() {
            writeln!(w, "      slot {}: {}", slot, name)?;
        }
    }
    writeln!(w)?;

    writeln!(w, "Functions ({}):", module.functions.len())?;
    for (i, func) in module.functions.iter().enumerate() {
        disassemble_function(module, i, func, w)?;
        writeln!(w)?;
    }

    Ok(())
}

pub fn disassemble_function_to_string(
    module: &Module,
    func_id: usize,
    func: &FunctionCode,
) -> String {
    let mut output = String::new();
    let _ = disassemble_function(module, func_id, func, &mut output);
    output
}

pub fn disassemble_function(
    module: &Module,
    func_id: usize,
    func: &FunctionCode,
    w: &mut impl Write,
) -> fmt::Result {
    writeln!(
        w,
        "Function #{} - {} (arity={}, locals={}, flags={:?}) -> {}",
        func_id, func.qualname, func.arity, func.num_locals, func.flags, func.ret_type
    )?;
    if !func.cells.is_empty() || !func.freevars.is_empty() {
        writeln!(w, "  cells={:?} freevars={:?}", func.cells, func.freevars)?;
    }
    writeln!(w, "  Instructions:")?;

    for (i, ins) in func.code.iter().enumerate() {
        write!(w, "    {:4}: ", i)?;
        disassemble_instruction(module, func, i, ins, w)?;
        writeln!(w)?;
    }

    Ok(())
}

fn local_name(func: &FunctionCode, slot: u16) -> &str {
    func.varnames
        .get(slot as usize)
        .map(String::as_str)
        .unwrap_or("?")
}

fn disassemble_instruction(
    module: &Module,
    func: &FunctionCode,
    pos: usize,
    ins: &I,
    w: &mut impl Write,
) -> fmt::Result {
    let ins_name = ins.to_string();
    let sym = |s: &u16| module.symbol(*s);
    let target = |rel: &i32| pos as i64 + 1 + *rel as i64;
    match ins {
        I::ConstI64(n) => write!(w, "{} {}", ins_name, n),
        I::ConstF64(f) => write!(w, "{} {}", ins_name, f),
        I::ConstStr(idx) => {
            let s = module
                .string_pool
                .get(*idx as usize)
                .map(String::as_str)
                .unwrap_or("?");
            write!(w, "{} {} ({:?})", ins_name, idx, s)
        }

        I::LoadLocal(slot) | I::StoreLocal(slot) | I::DeleteLocal(slot) => {
            write!(w, "{} {} ({})", ins_name, slot, local_name(func, *slot))
        }
        I::LoadLocalTyped(slot, p) | I::StoreLocalTyped(slot, p) => {
            write!(w, "{} {} ({}: {})", ins_name, slot, local_name(func, *slot), p)
        }
        I::LoadGlobal(s)
        | I::StoreGlobal(s)
        | I::DeleteGlobal(s)
        | I::LoadAttr(s)
        | I::StoreAttr(s)
        | I::DeleteAttr(s)
        | I::DictInsert(s)
        | I::ImportName(s)
        | I::ImportFrom(s)
        | I::RaiseIfNone(s) => write!(w, "{} {} (\"{}\")", ins_name, s, sym(s)),
        I::LoadDeref(ix) | I::StoreDeref(ix) | I::LoadClosure(ix) => {
            let ix_usize = *ix as usize;
            let name = func
                .cells
                .get(ix_usize)
                .or_else(|| {
                    ix_usize
                        .checked_sub(func.cells.len())
                        .and_then(|i| func.freevars.get(i))
                })
                .map(String::as_str)
                .unwrap_or("?");
            write!(w, "{} {} ({})", ins_name, ix, name)
        }

        I::Binary(op) => write!(w, "{} {}", ins_name, op.symbol()),
        I::Compare(op) => write!(w, "{} {}", ins_name, op.symbol()),
        I::Unary(op) => write!(w, "{} {:?}", ins_name, op),
        I::PrimBinary(op, p) => write!(w, "{} {} {}", ins_name, op.symbol(), p),
        I::PrimCompare(op, p) => write!(w, "{} {} {}", ins_name, op.symbol(), p),
        I::PrimUnary(op, p) => write!(w, "{} {:?} {}", ins_name, op, p),

        I::Jump(rel)
        | I::JumpIfFalse(rel)
        | I::JumpIfTrue(rel)
        | I::JumpIfFalseOrPop(rel)
        | I::JumpIfTrueOrPop(rel)
        | I::ForIter(rel)
        | I::SetupExcept(rel) => write!(w, "{} {} (to {})", ins_name, rel, target(rel)),

        I::Call(argc) => write!(w, "{} (argc={})", ins_name, argc),
        I::CallKw(argc, names) => {
            let names: Vec<&str> = names.iter().map(sym).collect();
            write!(w, "{} (argc={}, kw={:?})", ins_name, argc, names)
        }
        I::MakeFunction {
            func_id,
            defaults,
            captures,
        } => {
            let name = module
                .functions
                .get(*func_id as usize)
                .map(|f| f.qualname.as_str())
                .unwrap_or("?");
            write!(
                w,
                "{} #{} \"{}\" (defaults={}, captures={})",
                ins_name, func_id, name, defaults, captures
            )
        }
        I::BuildClass(idx) => {
            let name = module
                .classes
                .get(*idx as usize)
                .map(|c| c.qualname.as_str())
                .unwrap_or("?");
            write!(w, "{} {} ({})", ins_name, idx, name)
        }

        I::BuildList(n) | I::BuildTuple(n) | I::BuildDict(n) | I::UnpackSequence(n) => {
            write!(w, "{} {}", ins_name, n)
        }
        I::Raise(n) | I::AssertFail(n) => write!(w, "{} {}", ins_name, n),

        I::LoadPrimConst(p, c) => write!(w, "{} {} {:?}", ins_name, p, c),
        I::PrimConvert { from, to } => write!(w, "{} {} -> {}", ins_name, from, to),
        I::PrimBox(p) | I::PrimUnbox(p) | I::ArrayNew(p) | I::ArrayLoad(p) | I::ArrayStore(p) => {
            write!(w, "{} {}", ins_name, p)
        }

        I::LoadField { offset, name } | I::StoreField { offset, name } => {
            write!(w, "{} {} (\"{}\")", ins_name, offset, sym(name))
        }
        I::InvokeMethod {
            name,
            slot,
            argc,
            ret,
        } => {
            write!(w, "{} \"{}\" slot={} argc={}", ins_name, sym(name), slot, argc)?;
            if let Some(ret) = ret {
                write!(w, " -> {}", ret)?;
            }
            Ok(())
        }
        I::InvokeFunction { name, argc, ret } => {
            write!(w, "{} \"{}\" argc={}", ins_name, sym(name), argc)?;
            if let Some(ret) = ret {
                write!(w, " -> {}", ret)?;
            }
            Ok(())
        }
        I::CheckArgs(checks) => {
            write!(w, "{}", ins_name)?;
            for (slot, ty) in checks {
                write!(w, " {}:{}", local_name(func, *slot), ty)?;
            }
            Ok(())
        }
        I::Cast(ty) => write!(w, "{} {}", ins_name, ty),
        I::LoadIterableArg { index, total } => write!(w, "{} {}/{}", ins_name, index, total),
        I::CheckMapping(names) => {
            let names: Vec<&str> = names.iter().map(sym).collect();
            write!(w, "{} {:?}", ins_name, names)
        }
        I::LoadMappingArg { name, skip } => {
            write!(w, "{} \"{}\" (skip={})", ins_name, sym(name), skip)
        }

        _ => write!(w, "{}", ins_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Prim, TypeDescr};
    use crate::vm::bytecode::PrimConst;

    #[test]
    fn shows_symbols_and_jump_targets() {
        let mut module = Module::new("m");
        module.symbols = vec!["f".into(), "x".into()];
        let mut f = FunctionCode::new(0, "f");
        f.params = vec!["x".into()];
        f.varnames = vec!["x".into()];
        f.num_locals = 1;
        f.code = vec![
            I::CheckArgs(vec![(0, TypeDescr::Str)]),
            I::LoadLocal(0),
            I::JumpIfFalse(1),
            I::LoadPrimConst(Prim::Int8, PrimConst::Int(-1)),
            I::Return,
        ];
        module.functions.push(f);

        let text = disassemble_module_to_string(&module);
        assert!(text.contains("Module m (dynamic)"));
        assert!(text.contains("CheckArgs x:str"));
        assert!(text.contains("LoadLocal 0 (x)"));
        assert!(text.contains("JumpIfFalse 1 (to 4)"));
        assert!(text.contains("LoadPrimConst int8 Int(-1)"));
    }
}
