fn main() {
    acoustic_survey::cli::run();
}
