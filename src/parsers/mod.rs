use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "parsers/bbp_dir.pest"] // relative to src
pub struct DirFileParser;

#[cfg(test)]
mod test {
    use super::*;
    use pest::Parser;

    const SMALL_DIR: &str = "BBP.dir, GDKversion 061041\n\
                             8 8 8\n\
                             0@0 BBPsize=16\n\
                             2 1 tmp_2 2 0 3 3 0 int 4 0 0 0 0 0 0 -1 12 12 0\n";

    #[test]
    fn header_and_one_entry() {
        let mut pairs = DirFileParser::parse(Rule::dir_file, SMALL_DIR).unwrap();
        let mut file = pairs.next().unwrap().into_inner();

        let header = file.next().unwrap();
        assert_eq!(header.as_rule(), Rule::header);
        let mut header = header.into_inner();

        let version_line = header.next().unwrap();
        assert_eq!(version_line.as_rule(), Rule::version_line);
        let version = version_line.into_inner().next().unwrap();
        assert_eq!(version.as_str(), "061041");

        let sizes: Vec<_> =
            header.next().unwrap().into_inner().map(|p| p.as_str().to_owned()).collect();
        assert_eq!(sizes, &["8", "8", "8"]);

        let seed: Vec<_> =
            header.next().unwrap().into_inner().map(|p| p.as_str().to_owned()).collect();
        assert_eq!(seed, &["0@0", "BBPsize=16"]);

        let entry = file.next().unwrap();
        assert_eq!(entry.as_rule(), Rule::entry_line);
        let fields: Vec<_> = entry
            .into_inner()
            .filter(|p| p.as_rule() == Rule::field)
            .map(|p| p.as_str().to_owned())
            .collect();
        assert_eq!(fields.len(), 20);
        assert_eq!(fields[0], "2");
        assert_eq!(fields[8], "int");
    }

    #[test]
    fn carriage_returns_are_tolerated() {
        let crlf = SMALL_DIR.replace('\n', "\r\n");
        assert!(DirFileParser::parse(Rule::dir_file, &crlf).is_ok());
    }

    #[test]
    fn missing_version_line_is_an_error() {
        let broken = "8 8 8\n0@0\n";
        assert!(DirFileParser::parse(Rule::dir_file, broken).is_err());
    }

    #[test]
    fn entry_less_directory_parses() {
        let empty = "BBP.dir, GDKversion 061041\n8 8 8\n0@0 BBPsize=16\n";
        let mut pairs = DirFileParser::parse(Rule::dir_file, empty).unwrap();
        let entries = pairs
            .next()
            .unwrap()
            .into_inner()
            .filter(|p| p.as_rule() == Rule::entry_line)
            .count();
        assert_eq!(entries, 0);
    }

    #[test]
    fn two_field_sizes_line_parses() {
        let old = "BBP.dir, GDKversion 061033\n8 8\n0@0\n";
        assert!(DirFileParser::parse(Rule::dir_file, old).is_ok());
    }
}
