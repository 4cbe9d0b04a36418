use std::env;
use std::process;

#[no_mangle]
#[inline(never)]
pub extern "C" fn probe_once(x: u64) -> u64 {
    x ^ 0x5a
}

#[no_mangle]
#[inline(never)]
pub extern "C" fn probe_many(x: u64) -> u64 {
    x.wrapping_mul(31).wrapping_add(7)
}

#[no_mangle]
#[inline(never)]
pub extern "C" fn probe_never(x: u64) -> u64 {
    x.rotate_left(13)
}

fn main() {
    let n: u64 = env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(0);

    let mut acc = probe_once(n);
    for i in 0..n {
        acc = probe_many(acc ^ i);
    }

    if acc == u64::MAX && n == u64::MAX {
        acc = probe_never(acc);
    }

    println!("{}", acc);
    process::exit(n as i32);
}
