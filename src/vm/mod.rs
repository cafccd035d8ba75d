pub mod builtins; // builtin 함수/클래스 통합 모듈
pub mod bytecode;
pub mod compiler;
pub mod disasm; // 디스어셈블러
pub mod machine; // machine/ 디렉토리
pub mod prim;
pub mod utils; // 유틸리티 함수
pub mod value;

pub use bytecode::{FunctionCode, Instruction, Module};
pub use compiler::Compiler;
pub use machine::{Vm, VmError, VmErrorKind, VmResult, err};
pub use value::{Object, ObjectData, Value};
