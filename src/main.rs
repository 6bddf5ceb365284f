fn main() {
    reelaware_lib::run()
}
