fn main() {
    adit::main();
}
