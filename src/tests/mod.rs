mod container_roundtrip;
mod insn_streams;
