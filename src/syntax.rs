use crate::{
    demangle::{
        default_flags,
        Demangler,
    },
    error::Result,
    logging::WarningSpam,
    memory::{
        MemoryAccessor,
        Reader,
    },
    rtti::{
        BaseClassDescriptor,
        CompleteObjectLocator,
    },
};
use std::fmt::{
    self,
    Display,
    Formatter,
    Write as _,
};

/// Deepest inheritance chain followed when rebuilding a hierarchy.
const MAX_DEPTH: usize = 64;

/// A class declaration recovered from a type name, and possibly from RTTI.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Class {
    /// The declared name, without namespaces or template arguments.
    pub name: String,
    /// Enclosing scopes, outermost first.
    pub namespaces: Vec<String>,
    pub template_arguments: Vec<Class>,
    /// Direct bases, in declaration order.
    pub base_classes: Vec<Class>,
    /// The descriptor this class was rebuilt from, when it came from RTTI.
    pub descriptor: Option<BaseClassDescriptor>,
    pub is_template_argument: bool,
}

struct Segment<'a> {
    /// The whole segment, template argument list included.
    text: &'a str,
    name: &'a str,
    arguments: Option<&'a str>,
}

/// Index of the `>` closing the `<` at `open`.
fn find_closing_angle(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices().skip_while(|&(i, _)| i < open) {
        match c {
            '<' => depth += 1,
            '>' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => (),
        }
    }
    None
}

/// Splits `Outer::Inner<T>::Name<U, V>` into its `::` separated segments.
///
/// Returns `None` if the name does not follow that grammar.
fn split_segments(s: &str) -> Option<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut i = 0;
    loop {
        let start = i;
        i += s[i..].find(['<', ':']).unwrap_or(s.len() - i);
        let name = s[start..i].trim();
        if name.is_empty() || name.contains('>') {
            return None;
        }

        let mut arguments = None;
        if s[i..].starts_with('<') {
            let close = find_closing_angle(s, i)?;
            arguments = Some(&s[i + 1..close]);
            i = close + 1;
            i += s[i..].len() - s[i..].trim_start().len();
        }

        segments.push(Segment {
            text: s[start..i].trim(),
            name,
            arguments,
        });

        if i == s.len() {
            return Some(segments);
        }
        let rest = s[i..].strip_prefix("::")?;
        if rest.trim().is_empty() {
            return None;
        }
        i = s.len() - rest.len();
    }
}

/// Splits a template argument list on its top level commas.
fn split_arguments(s: &str) -> Vec<&str> {
    if s.trim().is_empty() {
        return Vec::new();
    }
    let mut result = Vec::new();
    let mut depth = 0isize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '<' | '(' | '[' => depth += 1,
            '>' | ')' | ']' => depth -= 1,
            ',' if depth == 0 => {
                result.push(s[start..i].trim());
                start = i + 1;
            }
            _ => (),
        }
    }
    result.push(s[start..].trim());
    result
}

impl Class {
    /// Parses a declared type name such as `App::Ui::Widget<int, App::Ui::Style>`.
    ///
    /// Names that do not fit the namespace/template grammar are kept whole as an unqualified
    /// name.
    #[must_use]
    pub fn parse(full_name: &str) -> Self {
        Self::try_parse(full_name).unwrap_or_else(|| Self {
            name: full_name.trim().to_owned(),
            ..Self::default()
        })
    }

    fn try_parse(full_name: &str) -> Option<Self> {
        let segments = split_segments(full_name)?;
        let (last, enclosing) = segments.split_last()?;
        let template_arguments = last
            .arguments
            .map(|arguments| {
                split_arguments(arguments)
                    .into_iter()
                    .map(|argument| Self {
                        is_template_argument: true,
                        ..Self::parse(argument)
                    })
                    .collect()
            })
            .unwrap_or_default();
        Some(Self {
            name: last.name.to_owned(),
            namespaces: enclosing
                .iter()
                .map(|segment| segment.text.to_owned())
                .collect(),
            template_arguments,
            ..Self::default()
        })
    }

    /// Rebuilds the class and its inheritance tree from a complete object locator.
    pub fn from_complete_object_locator<A, D>(
        reader: &Reader<A>,
        demangler: &D,
        locator: &CompleteObjectLocator,
    ) -> Result<Option<Self>>
    where
        A: MemoryAccessor,
        D: Demangler + ?Sized,
    {
        let Some(hierarchy) = locator.class_hierarchy_descriptor(reader)? else {
            return Ok(None);
        };
        match hierarchy.base_class(reader, 0)? {
            Some(descriptor) => {
                Self::from_base_class_descriptor(reader, demangler, &descriptor).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Rebuilds the class described by `descriptor`, along with every base it contains.
    pub fn from_base_class_descriptor<A, D>(
        reader: &Reader<A>,
        demangler: &D,
        descriptor: &BaseClassDescriptor,
    ) -> Result<Self>
    where
        A: MemoryAccessor,
        D: Demangler + ?Sized,
    {
        let mut builder = HierarchyBuilder {
            reader,
            demangler,
            warnings: WarningSpam::new(
                "the base class array is either incomplete or the address does not point to RTTI",
            ),
        };
        builder.build(descriptor, 0)
    }

    /// Number of classes this class derives from, directly or not.
    #[must_use]
    pub fn total_base_class_count(&self) -> usize {
        self.base_classes.len()
            + self
                .base_classes
                .iter()
                .map(Self::total_base_class_count)
                .sum::<usize>()
    }

    #[must_use]
    pub fn is_base_class(&self) -> bool {
        self.descriptor.is_some()
    }

    /// `Namespace::Sub::Name<TemplateArguments>`
    #[must_use]
    pub fn qualified_name(&self) -> String {
        let mut result = String::new();
        for namespace in &self.namespaces {
            result.push_str(namespace);
            result.push_str("::");
        }
        result.push_str(&self.name);
        if !self.template_arguments.is_empty() {
            result.push('<');
            for (i, argument) in self.template_arguments.iter().enumerate() {
                if i > 0 {
                    result.push_str(", ");
                }
                result.push_str(&argument.qualified_name());
            }
            result.push('>');
        }
        result
    }

    /// The inheritance tree, one class per line, each base indented below its derived class.
    #[must_use]
    pub fn hierarchy_info(&self) -> String {
        fn visit(class: &Class, depth: usize, out: &mut String) {
            let _ = writeln!(out, "{:indent$}{class}", "", indent = depth * 2);
            for base in &class.base_classes {
                visit(base, depth + 1, out);
            }
        }

        let mut result = String::new();
        visit(self, 0, &mut result);
        result
    }
}

impl Display for Class {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.descriptor {
            Some(descriptor) => f.write_str(&descriptor.describe(&self.qualified_name())),
            None => f.write_str(&self.qualified_name()),
        }
    }
}

struct HierarchyBuilder<'a, A, D: ?Sized> {
    reader: &'a Reader<A>,
    demangler: &'a D,
    warnings: WarningSpam<'static>,
}

impl<A, D> HierarchyBuilder<'_, A, D>
where
    A: MemoryAccessor,
    D: Demangler + ?Sized,
{
    fn build(&mut self, descriptor: &BaseClassDescriptor, depth: usize) -> Result<Class> {
        let name = descriptor
            .type_descriptor(self.reader)?
            .map(|type_descriptor| {
                type_descriptor.name(self.demangler, false, true, default_flags())
            })
            .unwrap_or_default();
        let mut class = Class {
            descriptor: Some(*descriptor),
            ..Class::parse(&name)
        };

        if descriptor.sub_element_count == 0 {
            return Ok(class);
        }
        if depth >= MAX_DEPTH {
            self.warnings.warn(|| {
                format!(
                    "stopped following the bases of '{name}' at {}, the hierarchy is nested too deeply",
                    descriptor.location
                )
            });
            return Ok(class);
        }
        let Some(hierarchy) = descriptor.class_hierarchy_descriptor(self.reader)? else {
            self.warnings.warn(|| {
                format!(
                    "failed to read the class hierarchy descriptor of '{name}' at {}",
                    descriptor.location
                )
            });
            return Ok(class);
        };

        // slot 0 is the class itself, its bases follow in pre-order
        let last = descriptor
            .sub_element_count
            .min(hierarchy.base_class_count.saturating_sub(1));
        let mut cursor = 1u32;
        while cursor <= last {
            let Some(base) = hierarchy.base_class(self.reader, cursor)? else {
                self.warnings.warn(|| {
                    format!("failed to read base class {{{cursor}}} of '{name}'")
                });
                break;
            };
            // a base with bases of its own spans its whole subtree
            let base = self.build(&base, depth + 1)?;
            let consumed = u32::try_from(base.total_base_class_count()).unwrap_or(u32::MAX);
            cursor = cursor.saturating_add(1).saturating_add(consumed);
            class.base_classes.push(base);
        }
        Ok(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        demangle::Flags,
        testing::{
            demangler,
            ImageBuilder,
            TestImage,
        },
    };

    fn names(classes: &[Class]) -> Vec<String> {
        classes.iter().map(Class::qualified_name).collect()
    }

    #[test]
    fn test_parse_plain_name() {
        let class = Class::parse("Widget");
        assert_eq!(class.name, "Widget");
        assert!(class.namespaces.is_empty());
        assert!(class.template_arguments.is_empty());
        assert!(!class.is_template_argument);
    }

    #[test]
    fn test_parse_namespaces() {
        let class = Class::parse("App::Ui::Widget");
        assert_eq!(class.name, "Widget");
        assert_eq!(class.namespaces, ["App", "Ui"]);
    }

    #[test]
    fn test_parse_template_arguments() {
        let class = Class::parse("std::map<int, std::vector<App::Item>>");
        assert_eq!(class.name, "map");
        assert_eq!(class.namespaces, ["std"]);
        assert_eq!(names(&class.template_arguments), ["int", "std::vector<App::Item>"]);
        assert!(class.template_arguments.iter().all(|x| x.is_template_argument));

        let vector = &class.template_arguments[1];
        assert_eq!(vector.name, "vector");
        assert_eq!(vector.namespaces, ["std"]);
        assert_eq!(vector.template_arguments[0].name, "Item");
        assert_eq!(vector.template_arguments[0].namespaces, ["App"]);
    }

    #[test]
    fn test_parse_template_in_enclosing_scope() {
        let class = Class::parse("App::Outer<int, float>::Inner");
        assert_eq!(class.name, "Inner");
        assert_eq!(class.namespaces, ["App", "Outer<int, float>"]);
        assert!(class.template_arguments.is_empty());
    }

    #[test]
    fn test_parse_nested_closing_brackets() {
        let class = Class::parse("Holder<Box<Widget> >");
        assert_eq!(class.name, "Holder");
        assert_eq!(names(&class.template_arguments), ["Box<Widget>"]);
    }

    #[test]
    fn test_malformed_names_stay_whole() {
        for name in [
            "Foo<int",
            "Foo>::Bar",
            "App::",
            "::Widget",
            "App::::Widget",
            "Foo<int>Bar::Baz",
            "App:Widget",
        ] {
            let class = Class::parse(name);
            assert_eq!(class.name, name, "{name}");
            assert!(class.namespaces.is_empty(), "{name}");
            assert!(class.template_arguments.is_empty(), "{name}");
        }
        assert_eq!(Class::parse("").name, "");
    }

    #[test]
    fn test_round_trip_naming() {
        for name in [
            "Widget",
            "App::Widget",
            "App::Ui::Widget",
            "std::vector<int>",
            "std::pair<App::Key, std::vector<App::Value>>",
            "App::Detail<int>::Node<char, bool>",
            "`anonymous namespace'::Hidden",
            "Tuple<A, B, C, D>",
        ] {
            assert_eq!(Class::parse(name).qualified_name(), name);
            assert_eq!(Class::parse(name).to_string(), name);
        }
    }

    fn rebuild(image: &TestImage, id: usize) -> Class {
        let reader = image.reader();
        let locator = CompleteObjectLocator::decode(&reader, &demangler, image.locator(id))
            .unwrap()
            .unwrap();
        Class::from_complete_object_locator(&reader, &demangler, &locator)
            .unwrap()
            .unwrap()
    }

    /// Names of every base in the tree, in pre-order.
    fn pre_order(class: &Class) -> Vec<String> {
        let mut result = Vec::new();
        for base in &class.base_classes {
            result.push(base.qualified_name());
            result.extend(pre_order(base));
        }
        result
    }

    #[test]
    fn test_single_inheritance() {
        let mut builder = ImageBuilder::new(true);
        let base = builder.class(".?AVBase@App@@", &[]);
        let widget = builder.class(".?AVWidget@App@@", &[base]);
        let image = builder.finish();

        let class = rebuild(&image, widget);
        assert_eq!(class.qualified_name(), "App::Widget");
        assert!(class.is_base_class());
        assert_eq!(names(&class.base_classes), ["App::Base"]);
        assert!(class.base_classes[0].base_classes.is_empty());
        assert_eq!(class.total_base_class_count(), 1);
    }

    #[test]
    fn test_multiple_inheritance() {
        let mut builder = ImageBuilder::new(false);
        let first = builder.class(".?AVFirst@@", &[]);
        let second = builder.class(".?AVSecond@@", &[]);
        let third = builder.class(".?AVThird@@", &[]);
        let derived = builder.class(".?AVDerived@@", &[first, second, third]);
        let image = builder.finish();

        let class = rebuild(&image, derived);
        assert_eq!(names(&class.base_classes), ["First", "Second", "Third"]);
        assert_eq!(class.total_base_class_count(), 3);
    }

    #[test]
    fn test_multi_level_inheritance_consumes_every_slot_once() {
        for is_64bit in [true, false] {
            let mut builder = ImageBuilder::new(is_64bit);
            let a = builder.class(".?AVA@N@@", &[]);
            let b = builder.class(".?AVB@N@@", &[a]);
            let c = builder.class(".?AVC@N@@", &[]);
            let d = builder.class(".?AVD@N@@", &[b, c]);
            let e = builder.class(".?AVE@N@@", &[]);
            let f = builder.class(".?AVF@N@@", &[d, e]);
            let image = builder.finish();

            let class = rebuild(&image, f);
            assert_eq!(names(&class.base_classes), ["N::D", "N::E"]);
            let d = &class.base_classes[0];
            assert_eq!(names(&d.base_classes), ["N::B", "N::C"]);
            assert_eq!(names(&d.base_classes[0].base_classes), ["N::A"]);

            let reader = image.reader();
            let locator = CompleteObjectLocator::decode(&reader, &demangler, image.locator(f))
                .unwrap()
                .unwrap();
            let hierarchy = locator.class_hierarchy_descriptor(&reader).unwrap().unwrap();
            assert_eq!(hierarchy.base_class_count, 6);
            assert_eq!(
                class.total_base_class_count(),
                hierarchy.base_class_count as usize - 1
            );

            let slots: Vec<_> = hierarchy
                .base_classes(&reader)
                .unwrap()
                .iter()
                .skip(1)
                .map(|base| {
                    let type_descriptor = base.type_descriptor(&reader).unwrap().unwrap();
                    type_descriptor.name(&demangler, false, true, Flags::NAME_ONLY)
                })
                .collect();
            assert_eq!(pre_order(&class), slots);
        }
    }

    #[test]
    fn test_repeated_base_in_diamond() {
        let mut builder = ImageBuilder::new(true);
        let root = builder.class(".?AVRoot@@", &[]);
        let left = builder.class(".?AVLeft@@", &[root]);
        let right = builder.class(".?AVRight@@", &[root]);
        let bottom = builder.class(".?AVBottom@@", &[left, right]);
        let image = builder.finish();

        let class = rebuild(&image, bottom);
        assert_eq!(pre_order(&class), ["Left", "Root", "Right", "Root"]);
    }

    #[test]
    fn test_corrupt_sub_element_count_is_bounded() {
        let mut builder = ImageBuilder::new(true);
        let base = builder.class(".?AVBase@@", &[]);
        let widget = builder.class(".?AVWidget@@", &[base]);
        let mut image = builder.finish();
        image.set_sub_element_count(widget, u32::MAX);

        let class = rebuild(&image, widget);
        assert_eq!(names(&class.base_classes), ["Base"]);
    }

    #[test]
    fn test_self_referencing_base_stops_at_depth_limit() {
        let mut builder = ImageBuilder::new(true);
        let base = builder.class(".?AVBase@@", &[]);
        let widget = builder.class(".?AVWidget@@", &[base]);
        let mut image = builder.finish();
        image.set_base_class(widget, 1, widget);

        let class = rebuild(&image, widget);
        assert_eq!(class.total_base_class_count(), MAX_DEPTH);
        let mut depth = 0;
        let mut cursor = &class;
        while let [base] = cursor.base_classes.as_slice() {
            assert_eq!(base.qualified_name(), "Widget");
            cursor = base;
            depth += 1;
        }
        assert_eq!(depth, MAX_DEPTH);
        assert!(cursor.base_classes.is_empty());
    }

    #[test]
    fn test_rtti_class_renders_descriptor() {
        let mut builder = ImageBuilder::new(true);
        let base = builder.class(".?AVBase@App@@", &[]);
        let widget = builder.class(".?AVWidget@App@@", &[base]);
        let image = builder.finish();

        let class = rebuild(&image, widget);
        assert_eq!(
            class.to_string(),
            "App::Widget::`RTTI Base Class Descriptor at (0, -1, 0, 64)'"
        );
        assert_eq!(
            class.hierarchy_info(),
            "App::Widget::`RTTI Base Class Descriptor at (0, -1, 0, 64)'\n  \
             App::Base::`RTTI Base Class Descriptor at (0, -1, 0, 64)'\n"
        );
    }
}
