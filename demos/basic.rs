use brkalloc::{Config, Heap, SystemBreak};

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    let source = unsafe { SystemBreak::new() };
    let mut heap = Heap::initialize(source, Config::default());

    let sizes = [8, 100, 4096, 100_000];
    let mut ptrs = Vec::new();

    for size in sizes {
        let addr = heap.allocate(size);
        log_alloc(addr.as_ptr(), size);
        ptrs.push(addr);
    }

    println!("{:?}", heap.stats());

    unsafe {
        heap.free(ptrs[1].as_ptr());
        heap.free(ptrs[0].as_ptr());
        heap.free(ptrs[3].as_ptr());
        heap.free(ptrs[2].as_ptr());
    }

    for (addr, size) in heap.free_blocks() {
        println!("Free block at {addr:#x}: {size} bytes");
    }

    println!("{:?}", heap.stats());
}
