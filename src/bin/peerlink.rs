fn main() {
    std::process::exit(peerlink::pl::main());
}
