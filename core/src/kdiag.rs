//! Trap frame dumps.

use core::fmt::{self, Write};

use trapgate_abi::trap::T_PGFLT;
use trapgate_abi::{PageFaultError, PushRegs, Trapframe, trapname};
use trapgate_lib::CpuId;

pub fn print_regs(out: &mut dyn Write, regs: &PushRegs) -> fmt::Result {
    writeln!(out, "  r15  0x{:016x}", regs.r15)?;
    writeln!(out, "  r14  0x{:016x}", regs.r14)?;
    writeln!(out, "  r13  0x{:016x}", regs.r13)?;
    writeln!(out, "  r12  0x{:016x}", regs.r12)?;
    writeln!(out, "  r11  0x{:016x}", regs.r11)?;
    writeln!(out, "  r10  0x{:016x}", regs.r10)?;
    writeln!(out, "  r9   0x{:016x}", regs.r9)?;
    writeln!(out, "  r8   0x{:016x}", regs.r8)?;
    writeln!(out, "  rdi  0x{:016x}", regs.rdi)?;
    writeln!(out, "  rsi  0x{:016x}", regs.rsi)?;
    writeln!(out, "  rbp  0x{:016x}", regs.rbp)?;
    writeln!(out, "  rbx  0x{:016x}", regs.rbx)?;
    writeln!(out, "  rdx  0x{:016x}", regs.rdx)?;
    writeln!(out, "  rcx  0x{:016x}", regs.rcx)?;
    writeln!(out, "  rax  0x{:016x}", regs.rax)
}

/// Dump `tf` as taken on `cpu`.
///
/// `cr2` is the fault address register, passed only when `tf` is the frame
/// most recently dispatched on this CPU and is a page fault; for any other
/// frame the register no longer describes it.
pub fn print_trapframe(
    out: &mut dyn Write,
    tf: &Trapframe,
    cpu: CpuId,
    cr2: Option<u64>,
) -> fmt::Result {
    writeln!(out, "TRAP frame at {:p} from CPU {}", tf, cpu)?;
    print_regs(out, &tf.regs)?;
    writeln!(out, "  es   0x----{:04x}", tf.es)?;
    writeln!(out, "  ds   0x----{:04x}", tf.ds)?;
    writeln!(out, "  trap 0x{:08x} {}", tf.trapno, trapname(tf.trapno))?;
    if let Some(cr2) = cr2 {
        writeln!(out, "  cr2  0x{:016x}", cr2)?;
    }
    write!(out, "  err  0x{:08x}", tf.err)?;
    if tf.trapno == T_PGFLT {
        let (mode, access, cause) = PageFaultError::from_bits_truncate(tf.err).describe();
        writeln!(out, " [{}, {}, {}]", mode, access, cause)?;
    } else {
        writeln!(out)?;
    }
    writeln!(out, "  rip  0x{:016x}", tf.rip)?;
    writeln!(out, "  cs   0x----{:04x}", tf.cs)?;
    writeln!(out, "  flag 0x{:08x}", tf.rflags)?;
    if tf.privilege() != 0 {
        writeln!(out, "  rsp  0x{:016x}", tf.rsp)?;
        writeln!(out, "  ss   0x----{:04x}", tf.ss)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use trapgate_abi::trap::{T_GPFLT, T_SYSCALL};

    fn user_frame(trapno: u64, err: u64) -> Trapframe {
        let mut tf = Trapframe {
            trapno,
            err,
            rip: 0x80_0020,
            cs: 0x1B,
            ss: 0x23,
            es: 0x23,
            ds: 0x23,
            rflags: 0x202,
            rsp: 0xef_ffe0,
            ..Default::default()
        };
        tf.regs.rax = 0xdead;
        tf.regs.r15 = 1;
        tf
    }

    fn dump(tf: &Trapframe, cr2: Option<u64>) -> String {
        let mut out = String::new();
        print_trapframe(&mut out, tf, CpuId(1), cr2).unwrap();
        out
    }

    #[test]
    fn page_fault_dump_decodes_error_and_shows_cr2() {
        let tf = user_frame(T_PGFLT, 0x6);
        let out = dump(&tf, Some(0x1234));
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[0].starts_with("TRAP frame at 0x"));
        assert!(lines[0].ends_with("from CPU 1"));
        assert_eq!(lines[1], "  r15  0x0000000000000001");
        assert_eq!(lines[15], "  rax  0x000000000000dead");
        assert_eq!(lines[16], "  es   0x----0023");
        assert_eq!(lines[18], "  trap 0x0000000e Page Fault");
        assert_eq!(lines[19], "  cr2  0x0000000000001234");
        assert_eq!(lines[20], "  err  0x00000006 [user, write, not-present]");
        assert_eq!(lines[21], "  rip  0x0000000000800020");
        assert_eq!(lines[22], "  cs   0x----001b");
        assert_eq!(lines[23], "  flag 0x00000202");
        assert_eq!(lines[24], "  rsp  0x0000000000efffe0");
        assert_eq!(lines[25], "  ss   0x----0023");
        assert_eq!(lines.len(), 26);
    }

    #[test]
    fn other_traps_omit_cr2_and_decode() {
        let out = dump(&user_frame(T_SYSCALL, 0), None);
        assert!(out.contains("  trap 0x00000030 System call\n"));
        assert!(out.contains("  err  0x00000000\n"));
        assert!(!out.contains("cr2"));
    }

    #[test]
    fn kernel_frame_has_no_user_stack() {
        let mut tf = user_frame(T_GPFLT, 0);
        tf.cs = 0x08;
        let out = dump(&tf, None);
        assert!(out.contains("General Protection"));
        assert!(!out.contains("  rsp "));
        assert!(!out.contains("  ss "));
        assert!(out.ends_with("  flag 0x00000202\n"));
    }
}
